//! # In-Memory Station Store
//!
//! A [`StationStore`] over a plain `HashMap`, used by the service and
//! scheduler test suites and handy for local development without a
//! database. The conditional-update semantics match the PostgreSQL
//! implementation exactly: the swap applies only while the stored
//! sub-record still equals the expected prior state.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::models::{SafeRecord, StationRecord};
use super::{StationStore, StoreError, UpdateOutcome};

/// In-process [`StationStore`].
#[derive(Default)]
pub struct MemoryStationStore {
    // Map of station_id -> StationRecord
    stations: Mutex<HashMap<String, StationRecord>>,
}

impl MemoryStationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given stations.
    pub fn with_stations(stations: Vec<StationRecord>) -> Self {
        let map = stations
            .into_iter()
            .map(|s| (s.station_id.clone(), s))
            .collect();
        Self {
            stations: Mutex::new(map),
        }
    }

    /// Insert or replace a station record.
    pub fn insert_station(&self, station: StationRecord) {
        self.stations
            .lock()
            .expect("station map poisoned")
            .insert(station.station_id.clone(), station);
    }
}

#[async_trait]
impl StationStore for MemoryStationStore {
    async fn get_station(&self, station_id: &str) -> Result<Option<StationRecord>, StoreError> {
        let stations = self.stations.lock().expect("station map poisoned");
        Ok(stations.get(station_id).cloned())
    }

    async fn conditional_update_safe(
        &self,
        station_id: &str,
        expected: &SafeRecord,
        new: &SafeRecord,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut stations = self.stations.lock().expect("station map poisoned");

        let Some(station) = stations.get_mut(station_id) else {
            return Ok(UpdateOutcome::Conflict);
        };

        let Some(safe) = station
            .safes
            .iter_mut()
            .find(|s| s.safe_id == expected.safe_id)
        else {
            return Ok(UpdateOutcome::Conflict);
        };

        if safe != expected {
            return Ok(UpdateOutcome::Conflict);
        }

        *safe = new.clone();
        Ok(UpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn demo_station() -> StationRecord {
        StationRecord {
            station_id: "station_1".to_string(),
            address: "123 Main St, Cityville".to_string(),
            safes: vec![SafeRecord::free(1), SafeRecord::free(2)],
        }
    }

    #[tokio::test]
    async fn get_station_roundtrip() {
        let store = MemoryStationStore::with_stations(vec![demo_station()]);

        let station = store.get_station("station_1").await.unwrap().unwrap();
        assert_eq!(station.address, "123 Main St, Cityville");
        assert_eq!(station.safes.len(), 2);

        assert!(store.get_station("station_9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_update_applies_once() {
        let store = MemoryStationStore::with_stations(vec![demo_station()]);

        let expected = SafeRecord::free(1);
        let new = SafeRecord {
            safe_id: 1,
            reserved_until: Some(Utc::now() + Duration::minutes(5)),
            pin: Some("1234".to_string()),
        };

        let first = store
            .conditional_update_safe("station_1", &expected, &new)
            .await
            .unwrap();
        assert_eq!(first, UpdateOutcome::Applied);

        // Same expected prior state no longer matches.
        let second = store
            .conditional_update_safe("station_1", &expected, &new)
            .await
            .unwrap();
        assert_eq!(second, UpdateOutcome::Conflict);
    }

    #[tokio::test]
    async fn conditional_update_unknown_safe_is_conflict() {
        let store = MemoryStationStore::with_stations(vec![demo_station()]);

        let expected = SafeRecord::free(42);
        let outcome = store
            .conditional_update_safe("station_1", &expected, &SafeRecord::free(42))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Conflict);
    }
}
