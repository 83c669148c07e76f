//! # Expiry Scheduler Service
//!
//! Guarantees that every accepted reservation gets a reclaim attempt at
//! (or shortly after) its expiry instant, without blocking request
//! handling and without one parked task per pending reservation.
//!
//! ## Execution model
//!
//! ```text
//! ReservationService ── schedule() ──▶ channel ──▶ ExpiryDispatcher
//!                                                   │  (single task)
//!                                      min-heap of deadlines, sleeps
//!                                      until the earliest one
//!                                                   │
//!                                            deadline reached
//!                                                   │
//!                                        tokio::spawn(run_reclaim)
//!                                          read → reclaim → CAS
//! ```
//!
//! The dispatcher owns a min-heap keyed on the expiry instant and a
//! single loop that waits for whichever comes first: the next deadline,
//! or a new registration. Each due entry becomes an independent spawned
//! reclaim unit, so a slow store round-trip never delays other
//! deadlines. No lock is held across any wait.
//!
//! Firing early is not possible: due entries are re-checked against the
//! clock after every wake-up, and the reclaim transition itself requires
//! the expiry to have passed. Firing late is harmless — the reclaim only
//! applies while the safe still carries the exact reservation it was
//! scheduled for, so unlocks and re-reservations self-cancel it.
//!
//! Pending timers are in-process only. Losing them on restart is
//! acceptable: reserve treats expired safes as free and the list path
//! normalizes them, so a missed reclaim just leaves a stale record until
//! the next read.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::store::{StationStore, UpdateOutcome};

use super::reservation_engine;

/// A pending reclaim registration.
#[derive(Debug, Clone, Eq, PartialEq)]
struct ReclaimEntry {
    /// The expiry instant this reclaim was scheduled for. Doubles as the
    /// compare value in the reclaim precondition.
    expires_at: DateTime<Utc>,
    /// Station holding the safe.
    station_id: String,
    /// Safe number within the station.
    safe_id: i32,
}

impl Ord for ReclaimEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest expiry first)
        other
            .expires_at
            .cmp(&self.expires_at)
            .then_with(|| other.station_id.cmp(&self.station_id))
            .then_with(|| other.safe_id.cmp(&self.safe_id))
    }
}

impl PartialOrd for ReclaimEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle for registering reclaims.
///
/// Cheap to clone; `schedule` is a non-blocking channel send.
#[derive(Clone)]
pub struct ExpiryScheduler {
    tx: mpsc::UnboundedSender<ReclaimEntry>,
}

impl ExpiryScheduler {
    /// Create a scheduler handle plus the dispatcher that serves it.
    ///
    /// The dispatcher must be driven by the caller, typically
    /// `tokio::spawn(dispatcher.run())` from main.
    pub fn new(
        store: Arc<dyn StationStore>,
        reclaim_retry_attempts: u32,
        reclaim_retry_delay_ms: u64,
    ) -> (Self, ExpiryDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            ExpiryDispatcher {
                rx,
                heap: BinaryHeap::new(),
                store,
                reclaim_retry_attempts,
                reclaim_retry_delay_ms,
            },
        )
    }

    /// Register a reclaim attempt for `expires_at`.
    ///
    /// Returns immediately; the dispatcher picks the entry up on its next
    /// wake-up. An unlock before the deadline needs no cancellation — the
    /// reclaim precondition makes the late firing a no-op.
    pub fn schedule(&self, station_id: &str, safe_id: i32, expires_at: DateTime<Utc>) {
        let entry = ReclaimEntry {
            expires_at,
            station_id: station_id.to_string(),
            safe_id,
        };
        if self.tx.send(entry).is_err() {
            // Dispatcher gone (shutdown); read-path normalization covers it.
            warn!(
                "Expiry dispatcher unavailable; reclaim for safe {} at {} will rely on read-path cleanup",
                safe_id, station_id
            );
        }
    }
}

/// What woke the dispatcher loop.
enum Wakeup {
    /// A new registration arrived.
    Registered(ReclaimEntry),
    /// The earliest deadline elapsed.
    DeadlineReached,
    /// All scheduler handles dropped.
    Closed,
}

/// The dispatcher task behind [`ExpiryScheduler`].
pub struct ExpiryDispatcher {
    /// Incoming registrations.
    rx: mpsc::UnboundedReceiver<ReclaimEntry>,
    /// Min-heap of pending reclaims, earliest expiry on top.
    heap: BinaryHeap<ReclaimEntry>,
    /// Store the reclaim units write through.
    store: Arc<dyn StationStore>,
    /// Attempts per reclaim when the store is unreachable.
    reclaim_retry_attempts: u32,
    /// Initial backoff delay between attempts.
    reclaim_retry_delay_ms: u64,
}

impl ExpiryDispatcher {
    /// Run the dispatcher loop until every scheduler handle is dropped
    /// and all pending deadlines have fired.
    pub async fn run(mut self) {
        info!("Starting expiry dispatcher");
        let mut closed = false;

        loop {
            let wakeup = match self.heap.peek() {
                Some(next) => {
                    let wait = (next.expires_at - Utc::now())
                        .to_std()
                        .unwrap_or(StdDuration::ZERO);
                    if closed {
                        // No more registrations can arrive; just drain
                        // the remaining deadlines.
                        tokio::time::sleep(wait).await;
                        Wakeup::DeadlineReached
                    } else {
                        tokio::select! {
                            received = self.rx.recv() => match received {
                                Some(entry) => Wakeup::Registered(entry),
                                None => Wakeup::Closed,
                            },
                            _ = tokio::time::sleep(wait) => Wakeup::DeadlineReached,
                        }
                    }
                }
                None if closed => break,
                None => match self.rx.recv().await {
                    Some(entry) => Wakeup::Registered(entry),
                    None => Wakeup::Closed,
                },
            };

            match wakeup {
                Wakeup::Registered(entry) => {
                    debug!(
                        "Reclaim registered: safe {} at {} expires {}",
                        entry.safe_id, entry.station_id, entry.expires_at
                    );
                    self.heap.push(entry);
                }
                Wakeup::DeadlineReached => self.fire_due(),
                Wakeup::Closed => {
                    if self.heap.is_empty() {
                        break;
                    }
                    closed = true;
                }
            }
        }

        info!("Expiry dispatcher stopped");
    }

    /// Pop every entry whose deadline has passed and spawn its reclaim.
    fn fire_due(&mut self) {
        let now = Utc::now();
        while let Some(next) = self.heap.peek() {
            if next.expires_at > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry present");
            let store = Arc::clone(&self.store);
            let attempts = self.reclaim_retry_attempts;
            let delay_ms = self.reclaim_retry_delay_ms;
            tokio::spawn(async move {
                run_reclaim(store, entry, attempts, delay_ms).await;
            });
        }
    }
}

/// One reclaim unit: read the safe, apply the reclaim transition, write
/// it back conditionally.
///
/// Store failures are retried with exponential backoff. A CAS conflict
/// means a concurrent unlock/reserve touched the safe; the re-read on the
/// next attempt resolves it (almost always into the no-op branch). If
/// every attempt fails the safe is left expired-but-uncollected, which
/// any later read normalizes.
async fn run_reclaim(
    store: Arc<dyn StationStore>,
    entry: ReclaimEntry,
    attempts: u32,
    initial_delay_ms: u64,
) {
    for attempt in 0..=attempts {
        if attempt > 0 {
            let delay_ms = initial_delay_ms * (1 << (attempt - 1));
            tokio::time::sleep(StdDuration::from_millis(delay_ms)).await;
        }

        let station = match store.get_station(&entry.station_id).await {
            Ok(Some(station)) => station,
            Ok(None) => {
                warn!(
                    "Reclaim skipped: station {} no longer exists",
                    entry.station_id
                );
                return;
            }
            Err(e) => {
                warn!(
                    "Reclaim read failed for safe {} at {} (attempt {}): {}",
                    entry.safe_id,
                    entry.station_id,
                    attempt + 1,
                    e
                );
                continue;
            }
        };

        let Some(safe) = station.safe(entry.safe_id) else {
            warn!(
                "Reclaim skipped: safe {} no longer exists at station {}",
                entry.safe_id, entry.station_id
            );
            return;
        };

        let Some(cleared) = reservation_engine::reclaim(safe, entry.expires_at, Utc::now()) else {
            // Unlocked, re-reserved, or already reclaimed.
            debug!(
                "Reclaim no-op for safe {} at {}",
                entry.safe_id, entry.station_id
            );
            return;
        };

        match store
            .conditional_update_safe(&entry.station_id, safe, &cleared)
            .await
        {
            Ok(UpdateOutcome::Applied) => {
                info!(
                    "Safe {} at station {} automatically released after reservation expiry",
                    entry.safe_id, entry.station_id
                );
                return;
            }
            Ok(UpdateOutcome::Conflict) => {
                // Raced with an unlock or a fresh reservation; re-read.
                debug!(
                    "Reclaim lost the race for safe {} at {}; re-checking",
                    entry.safe_id, entry.station_id
                );
                continue;
            }
            Err(e) => {
                warn!(
                    "Reclaim write failed for safe {} at {} (attempt {}): {}",
                    entry.safe_id,
                    entry.station_id,
                    attempt + 1,
                    e
                );
                continue;
            }
        }
    }

    error!(
        "Reclaim for safe {} at station {} gave up after {} attempts; safe stays stale until next access",
        entry.safe_id,
        entry.station_id,
        attempts + 1
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStationStore;
    use crate::store::{SafeRecord, StationRecord};
    use chrono::Duration;

    fn station_with_reserved_safe(until: DateTime<Utc>, pin: &str) -> StationRecord {
        StationRecord {
            station_id: "station_1".to_string(),
            address: "123 Main St, Cityville".to_string(),
            safes: vec![SafeRecord {
                safe_id: 7,
                reserved_until: Some(until),
                pin: Some(pin.to_string()),
            }],
        }
    }

    async fn safe_snapshot(store: &MemoryStationStore) -> SafeRecord {
        store
            .get_station("station_1")
            .await
            .unwrap()
            .unwrap()
            .safe(7)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn due_reclaim_clears_expired_reservation() {
        let expiry = Utc::now() + Duration::milliseconds(50);
        let store = Arc::new(MemoryStationStore::with_stations(vec![
            station_with_reserved_safe(expiry, "1234"),
        ]));

        let (scheduler, dispatcher) = ExpiryScheduler::new(store.clone(), 2, 10);
        let handle = tokio::spawn(dispatcher.run());

        scheduler.schedule("station_1", 7, expiry);

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(safe_snapshot(&store).await, SafeRecord::free(7));

        drop(scheduler);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reclaim_with_past_expiry_fires_immediately() {
        let expiry = Utc::now() - Duration::seconds(5);
        let store = Arc::new(MemoryStationStore::with_stations(vec![
            station_with_reserved_safe(expiry, "1234"),
        ]));

        let (scheduler, dispatcher) = ExpiryScheduler::new(store.clone(), 2, 10);
        let handle = tokio::spawn(dispatcher.run());

        scheduler.schedule("station_1", 7, expiry);

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(safe_snapshot(&store).await, SafeRecord::free(7));

        drop(scheduler);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn late_reclaim_never_clobbers_newer_reservation() {
        let old_expiry = Utc::now() + Duration::milliseconds(50);
        let store = Arc::new(MemoryStationStore::with_stations(vec![
            station_with_reserved_safe(old_expiry, "1234"),
        ]));

        // Another client re-reserves before the timer fires.
        let new_until = Utc::now() + Duration::minutes(10);
        let prior = safe_snapshot(&store).await;
        let renewed = SafeRecord {
            safe_id: 7,
            reserved_until: Some(new_until),
            pin: Some("5678".to_string()),
        };
        store
            .conditional_update_safe("station_1", &prior, &renewed)
            .await
            .unwrap();

        let (scheduler, dispatcher) = ExpiryScheduler::new(store.clone(), 2, 10);
        let handle = tokio::spawn(dispatcher.run());

        scheduler.schedule("station_1", 7, old_expiry);

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        // The newer reservation is untouched.
        assert_eq!(safe_snapshot(&store).await, renewed);

        drop(scheduler);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn earlier_registration_fires_before_later_head() {
        // A later deadline is registered first; the dispatcher must still
        // wake for the earlier one on time.
        let far = Utc::now() + Duration::seconds(30);
        let near = Utc::now() + Duration::milliseconds(50);
        let store = Arc::new(MemoryStationStore::with_stations(vec![StationRecord {
            station_id: "station_1".to_string(),
            address: "123 Main St, Cityville".to_string(),
            safes: vec![
                SafeRecord {
                    safe_id: 7,
                    reserved_until: Some(near),
                    pin: Some("1234".to_string()),
                },
                SafeRecord {
                    safe_id: 8,
                    reserved_until: Some(far),
                    pin: Some("4321".to_string()),
                },
            ],
        }]));

        let (scheduler, dispatcher) = ExpiryScheduler::new(store.clone(), 2, 10);
        let handle = tokio::spawn(dispatcher.run());

        scheduler.schedule("station_1", 8, far);
        scheduler.schedule("station_1", 7, near);

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        let station = store.get_station("station_1").await.unwrap().unwrap();
        assert_eq!(station.safe(7).unwrap(), &SafeRecord::free(7));
        // The far deadline has not fired yet.
        assert_eq!(station.safe(8).unwrap().pin.as_deref(), Some("4321"));

        drop(scheduler);
        handle.abort();
    }
}
