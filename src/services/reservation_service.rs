//! # Reservation Service
//!
//! The ReservationService is the central service for safe reservations.
//! It coordinates the reservation engine, the station store and the
//! expiry scheduler.
//!
//! ## Responsibilities
//!
//! - Validate reserve/unlock input (PIN shape, duration bounds)
//! - Run the engine transition against a fresh safe snapshot
//! - Persist the result with a conditional (compare-and-swap) write
//! - Register the automatic reclaim for accepted reservations
//! - Normalize stale entries on the read path
//!
//! ## Flow Example: Reserve
//!
//! ```text
//! 1. Client requests reservation via API
//!                ↓
//! 2. ReservationService.reserve_safe() called
//!                ↓
//! 3. Read station record from store
//!                ↓
//! 4. reservation_engine::reserve() on the target safe
//!                ↓
//! 5. Conditional write of the safe sub-record
//!        │ conflict? → re-read and retry (bounded)
//!                ↓
//! 6. ExpiryScheduler.schedule(expiry)
//!                ↓
//! 7. Return expiry to caller
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::store::{SafeRecord, SafeState, StationRecord, StationStore, UpdateOutcome};
use crate::utils;

use super::expiry_scheduler::ExpiryScheduler;
use super::reservation_engine::{self, Rejection};

/// How many times a CAS-conflicted operation is re-read and re-run
/// before the conflict is surfaced to the caller.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Errors that can occur in reservation operations.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// Station id is unknown.
    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// Safe id is unknown at the given station.
    #[error("Safe {safe_id} not found at station {station_id}")]
    SafeNotFound { station_id: String, safe_id: i32 },

    /// The safe is reserved and its window has not elapsed.
    #[error("Safe {safe_id} is already reserved until {until}")]
    AlreadyReserved {
        safe_id: i32,
        until: DateTime<Utc>,
    },

    /// Unlock attempted on a free or expired safe.
    #[error("Safe {0} is not reserved or the reservation expired")]
    NotReserved(i32),

    /// Supplied PIN does not match.
    #[error("Incorrect PIN for safe {0}")]
    WrongPin(i32),

    /// Malformed PIN or out-of-range duration.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store was unreachable.
    #[error("Store error: {0}")]
    StoreError(String),
}

/// The effective reservation state of one safe, as reported to clients.
///
/// PINs are never included: the operation contract exposes reservation
/// state, not credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeStatus {
    /// Safe number within the station.
    pub safe_id: i32,
    /// Whether the safe is currently reserved.
    pub reserved: bool,
    /// Expiry of the active reservation, if any.
    pub reserved_until: Option<DateTime<Utc>>,
}

/// A station's address plus the effective state of all its safes.
#[derive(Debug, Clone)]
pub struct StationView {
    pub station_id: String,
    pub address: String,
    pub safes: Vec<SafeStatus>,
}

/// The main service for safe reservation operations.
///
/// ## Usage
///
/// ```rust,ignore
/// let service = ReservationService::new(store, scheduler, 1440);
///
/// let expiry = service
///     .reserve_safe("station_1", 7, "1234", Duration::minutes(30))
///     .await?;
/// ```
#[derive(Clone)]
pub struct ReservationService {
    /// Station store for reading and conditionally writing safe state.
    store: Arc<dyn StationStore>,

    /// Handle for registering automatic reclaims.
    scheduler: ExpiryScheduler,

    /// Upper bound on a single reservation, in minutes.
    max_reservation_minutes: i64,
}

impl ReservationService {
    /// Create a new ReservationService.
    ///
    /// ## Arguments
    ///
    /// * `store` - Station store backend
    /// * `scheduler` - Expiry scheduler handle
    /// * `max_reservation_minutes` - Longest allowed reservation window
    pub fn new(
        store: Arc<dyn StationStore>,
        scheduler: ExpiryScheduler,
        max_reservation_minutes: i64,
    ) -> Self {
        Self {
            store,
            scheduler,
            max_reservation_minutes,
        }
    }

    // ==========================================
    // QUERIES
    // ==========================================

    /// List a station's safes with their effective reservation state.
    ///
    /// Expired-but-uncollected entries are reported as free and
    /// opportunistically cleared in the store with best-effort
    /// conditional writes. Losing such a write just means someone else
    /// (an unlock, a reserve, the scheduled reclaim) resolved the entry
    /// first; the returned view is normalized either way.
    pub async fn list_safes(&self, station_id: &str) -> Result<StationView, ReservationError> {
        debug!("Listing safes for station: {}", station_id);

        let station = self.read_station(station_id).await?;
        let now = Utc::now();

        let mut safes = Vec::with_capacity(station.safes.len());
        for safe in &station.safes {
            let state = safe.state_at(now);

            if state == SafeState::Expired {
                let cleared = SafeRecord::free(safe.safe_id);
                match self
                    .store
                    .conditional_update_safe(station_id, safe, &cleared)
                    .await
                {
                    Ok(UpdateOutcome::Applied) => {
                        debug!(
                            "Normalized expired safe {} at station {}",
                            safe.safe_id, station_id
                        );
                    }
                    Ok(UpdateOutcome::Conflict) => {
                        // Someone else resolved it; nothing to do.
                    }
                    Err(e) => {
                        warn!(
                            "Failed to normalize expired safe {} at {}: {}",
                            safe.safe_id, station_id, e
                        );
                    }
                }
            }

            let reserved = state == SafeState::Reserved;
            safes.push(SafeStatus {
                safe_id: safe.safe_id,
                reserved,
                reserved_until: if reserved { safe.reserved_until } else { None },
            });
        }

        Ok(StationView {
            station_id: station.station_id,
            address: station.address,
            safes,
        })
    }

    // ==========================================
    // OPERATIONS
    // ==========================================

    /// Reserve a safe with a PIN for the given duration.
    ///
    /// Returns the reservation expiry on success. A conditional-write
    /// conflict (a concurrent writer touched the same safe between the
    /// read and the write) is retried by re-reading and re-running the
    /// engine step, up to a small bounded number of attempts.
    pub async fn reserve_safe(
        &self,
        station_id: &str,
        safe_id: i32,
        pin: &str,
        duration: Duration,
    ) -> Result<DateTime<Utc>, ReservationError> {
        utils::validate_pin(pin).map_err(ReservationError::InvalidInput)?;
        self.validate_duration(duration)?;

        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let station = self.read_station(station_id).await?;
            let safe = station
                .safe(safe_id)
                .ok_or_else(|| ReservationError::SafeNotFound {
                    station_id: station_id.to_string(),
                    safe_id,
                })?;

            let reserved = reservation_engine::reserve(safe, pin, duration, Utc::now())
                .map_err(|r| self.map_rejection(r, safe_id))?;

            match self
                .store
                .conditional_update_safe(station_id, safe, &reserved.safe)
                .await
                .map_err(|e| ReservationError::StoreError(e.to_string()))?
            {
                UpdateOutcome::Applied => {
                    info!(
                        "Safe {} at station {} reserved until {}",
                        safe_id, station_id, reserved.reserved_until
                    );
                    self.scheduler
                        .schedule(station_id, safe_id, reserved.reserved_until);
                    return Ok(reserved.reserved_until);
                }
                UpdateOutcome::Conflict => {
                    debug!(
                        "Reserve lost a write race for safe {} at {} (attempt {})",
                        safe_id,
                        station_id,
                        attempt + 1
                    );
                    continue;
                }
            }
        }

        // Retries exhausted: a concurrent writer kept winning. From the
        // caller's point of view the safe is taken.
        warn!(
            "Reserve retries exhausted for safe {} at station {}",
            safe_id, station_id
        );
        Err(ReservationError::AlreadyReserved {
            safe_id,
            until: Utc::now(),
        })
    }

    /// Unlock a reserved safe with its PIN.
    pub async fn unlock_safe(
        &self,
        station_id: &str,
        safe_id: i32,
        pin: &str,
    ) -> Result<(), ReservationError> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let station = self.read_station(station_id).await?;
            let safe = station
                .safe(safe_id)
                .ok_or_else(|| ReservationError::SafeNotFound {
                    station_id: station_id.to_string(),
                    safe_id,
                })?;

            let cleared = reservation_engine::unlock(safe, pin, Utc::now())
                .map_err(|r| self.map_rejection(r, safe_id))?;

            match self
                .store
                .conditional_update_safe(station_id, safe, &cleared)
                .await
                .map_err(|e| ReservationError::StoreError(e.to_string()))?
            {
                UpdateOutcome::Applied => {
                    info!("Safe {} at station {} unlocked", safe_id, station_id);
                    return Ok(());
                }
                UpdateOutcome::Conflict => {
                    debug!(
                        "Unlock lost a write race for safe {} at {} (attempt {})",
                        safe_id,
                        station_id,
                        attempt + 1
                    );
                    continue;
                }
            }
        }

        // The record changed under us on every attempt; the re-read on
        // the final pass decides the outcome, so reaching here means the
        // reservation this PIN belonged to is gone.
        Err(ReservationError::NotReserved(safe_id))
    }

    // ==========================================
    // HELPERS
    // ==========================================

    async fn read_station(&self, station_id: &str) -> Result<StationRecord, ReservationError> {
        self.store
            .get_station(station_id)
            .await
            .map_err(|e| ReservationError::StoreError(e.to_string()))?
            .ok_or_else(|| ReservationError::StationNotFound(station_id.to_string()))
    }

    fn validate_duration(&self, duration: Duration) -> Result<(), ReservationError> {
        if duration <= Duration::zero() {
            return Err(ReservationError::InvalidInput(
                "Reservation duration must be positive".to_string(),
            ));
        }
        if duration > Duration::minutes(self.max_reservation_minutes) {
            return Err(ReservationError::InvalidInput(format!(
                "Reservation duration exceeds the maximum of {} minutes",
                self.max_reservation_minutes
            )));
        }
        Ok(())
    }

    fn map_rejection(&self, rejection: Rejection, safe_id: i32) -> ReservationError {
        match rejection {
            Rejection::AlreadyReserved { until } => {
                ReservationError::AlreadyReserved { safe_id, until }
            }
            Rejection::NotReserved => ReservationError::NotReserved(safe_id),
            Rejection::WrongPin => ReservationError::WrongPin(safe_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStationStore;
    use std::time::Duration as StdDuration;

    fn demo_store() -> Arc<MemoryStationStore> {
        Arc::new(MemoryStationStore::with_stations(vec![StationRecord {
            station_id: "station_1".to_string(),
            address: "123 Main St, Cityville".to_string(),
            safes: vec![
                SafeRecord::free(1),
                SafeRecord::free(2),
                SafeRecord::free(7),
            ],
        }]))
    }

    fn service_over(
        store: Arc<MemoryStationStore>,
    ) -> (ReservationService, tokio::task::JoinHandle<()>) {
        let (scheduler, dispatcher) = ExpiryScheduler::new(store.clone(), 2, 10);
        let handle = tokio::spawn(dispatcher.run());
        (ReservationService::new(store, scheduler, 1440), handle)
    }

    async fn raw_safe(store: &MemoryStationStore, safe_id: i32) -> SafeRecord {
        store
            .get_station("station_1")
            .await
            .unwrap()
            .unwrap()
            .safe(safe_id)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn reserve_then_unlock_roundtrip() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        let before = Utc::now();
        let expiry = service
            .reserve_safe("station_1", 7, "1234", Duration::minutes(1))
            .await
            .unwrap();
        // Expiries are truncated to whole milliseconds, hence the margin.
        assert!(expiry >= before + Duration::minutes(1) - Duration::milliseconds(1));
        assert!(expiry <= Utc::now() + Duration::minutes(1));

        let stored = raw_safe(&store, 7).await;
        assert!(stored.is_consistent());
        assert_eq!(stored.pin.as_deref(), Some("1234"));

        service.unlock_safe("station_1", 7, "1234").await.unwrap();
        assert_eq!(raw_safe(&store, 7).await, SafeRecord::free(7));
    }

    #[tokio::test]
    async fn reserve_taken_safe_conflicts() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        service
            .reserve_safe("station_1", 7, "1234", Duration::minutes(5))
            .await
            .unwrap();

        let err = service
            .reserve_safe("station_1", 7, "9999", Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::AlreadyReserved { safe_id: 7, .. }
        ));
    }

    #[tokio::test]
    async fn wrong_pin_leaves_reservation_intact() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        service
            .reserve_safe("station_1", 7, "1234", Duration::minutes(5))
            .await
            .unwrap();

        let err = service
            .unlock_safe("station_1", 7, "0000")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::WrongPin(7)));

        // Still unlockable with the right PIN.
        service.unlock_safe("station_1", 7, "1234").await.unwrap();
    }

    #[tokio::test]
    async fn unlock_free_safe_is_not_reserved() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store);

        let err = service
            .unlock_safe("station_1", 7, "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NotReserved(7)));
    }

    #[tokio::test]
    async fn unknown_station_and_safe_are_not_found() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store);

        let err = service
            .reserve_safe("station_9", 1, "1234", Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::StationNotFound(_)));

        let err = service
            .reserve_safe("station_1", 99, "1234", Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::SafeNotFound { safe_id: 99, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_upfront() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store);

        let err = service
            .reserve_safe("station_1", 7, "12", Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidInput(_)));

        let err = service
            .reserve_safe("station_1", 7, "1234", Duration::minutes(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidInput(_)));

        let err = service
            .reserve_safe("station_1", 7, "1234", Duration::minutes(100_000))
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn expired_reservation_is_reservable_again() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        service
            .reserve_safe("station_1", 7, "1234", Duration::milliseconds(80))
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(150)).await;

        // Window elapsed; a different client takes the safe with a new PIN
        // without waiting for the scheduled reclaim.
        let expiry = service
            .reserve_safe("station_1", 7, "5678", Duration::minutes(5))
            .await
            .unwrap();
        assert!(expiry > Utc::now());
        assert_eq!(raw_safe(&store, 7).await.pin.as_deref(), Some("5678"));
    }

    #[tokio::test]
    async fn scheduled_reclaim_frees_safe_end_to_end() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        service
            .reserve_safe("station_1", 7, "1234", Duration::milliseconds(80))
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(500)).await;

        // The dispatcher has fired and cleared the record.
        assert_eq!(raw_safe(&store, 7).await, SafeRecord::free(7));

        // A stale PIN no longer opens anything.
        let err = service
            .unlock_safe("station_1", 7, "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NotReserved(7)));
    }

    #[tokio::test]
    async fn concurrent_reserves_admit_exactly_one_winner() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .reserve_safe("station_1", 7, &format!("100{}", i), Duration::minutes(5))
                    .await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(ReservationError::AlreadyReserved { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn list_safes_normalizes_expired_entries() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store.clone());

        // Plant an already-expired reservation directly in the store.
        let prior = raw_safe(&store, 2).await;
        let stale = SafeRecord {
            safe_id: 2,
            reserved_until: Some(Utc::now() - Duration::minutes(3)),
            pin: Some("1234".to_string()),
        };
        store
            .conditional_update_safe("station_1", &prior, &stale)
            .await
            .unwrap();

        let view = service.list_safes("station_1").await.unwrap();
        assert_eq!(view.address, "123 Main St, Cityville");

        let entry = view.safes.iter().find(|s| s.safe_id == 2).unwrap();
        assert!(!entry.reserved);
        assert!(entry.reserved_until.is_none());

        // The stale record was cleared in the store as well.
        assert_eq!(raw_safe(&store, 2).await, SafeRecord::free(2));
    }

    #[tokio::test]
    async fn list_safes_reports_active_reservations() {
        let store = demo_store();
        let (service, _dispatcher) = service_over(store);

        let expiry = service
            .reserve_safe("station_1", 1, "1234", Duration::minutes(5))
            .await
            .unwrap();

        let view = service.list_safes("station_1").await.unwrap();
        let entry = view.safes.iter().find(|s| s.safe_id == 1).unwrap();
        assert!(entry.reserved);
        assert_eq!(entry.reserved_until, Some(expiry));
    }
}
