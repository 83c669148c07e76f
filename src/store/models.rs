//! # Store Models
//!
//! This module defines the data structures that map to the station store.
//! Each struct represents one stored record.
//!
//! ## Record Overview
//!
//! | Record | Description |
//! |--------|-------------|
//! | `StationRecord` | A station and its full list of safes |
//! | `SafeRecord` | One safe's reservation sub-record |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌──────────────┐       ┌──────────────────┐
//! │   stations   │──────<│      safes       │
//! │              │       │                  │
//! │ station_id   │       │ station_id (FK)  │
//! │ address      │       │ safe_id          │
//! └──────────────┘       │ reserved_until   │
//!                        │ pin              │
//!                        └──────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One safe's reservation sub-record within a station.
///
/// The two optional fields move together: a safe either has both a
/// reservation expiry and a PIN, or neither. `conditional_update_safe`
/// compares the full prior sub-record, so this struct is also the unit
/// of optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeRecord {
    /// Safe number, unique within its station.
    pub safe_id: i32,

    /// When the current reservation ends. `None` means unreserved.
    pub reserved_until: Option<DateTime<Utc>>,

    /// PIN protecting the current reservation.
    /// Present if and only if `reserved_until` is present.
    pub pin: Option<String>,
}

/// The three logical states a safe can be in at a given instant.
///
/// `Expired` is transient: the reservation window has passed but nothing
/// has cleared the record yet. Every access path resolves it back to
/// `Free` (reserve treats it as free, unlock refuses the stale PIN, the
/// scheduled reclaim and the list path clear it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeState {
    /// No reservation on record.
    Free,
    /// Reserved, expiry strictly in the future.
    Reserved,
    /// Reservation on record but its expiry has passed.
    Expired,
}

impl SafeRecord {
    /// Create an unreserved safe.
    pub fn free(safe_id: i32) -> Self {
        Self {
            safe_id,
            reserved_until: None,
            pin: None,
        }
    }

    /// Logical state of this safe at `now`.
    ///
    /// "Reserved" means strictly `now < reserved_until`; at the exact
    /// expiry instant the safe counts as expired.
    pub fn state_at(&self, now: DateTime<Utc>) -> SafeState {
        match self.reserved_until {
            None => SafeState::Free,
            Some(until) if now < until => SafeState::Reserved,
            Some(_) => SafeState::Expired,
        }
    }

    /// Whether the pin/expiry pairing invariant holds.
    #[allow(dead_code)]
    pub fn is_consistent(&self) -> bool {
        self.pin.is_some() == self.reserved_until.is_some()
    }
}

/// A station and its safes, as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    /// Station identifier (e.g. "station_1").
    pub station_id: String,

    /// Street address shown to clients.
    pub address: String,

    /// All safes at this station, ordered by `safe_id`.
    pub safes: Vec<SafeRecord>,
}

impl StationRecord {
    /// Find a safe by id.
    pub fn safe(&self, safe_id: i32) -> Option<&SafeRecord> {
        self.safes.iter().find(|s| s.safe_id == safe_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn state_at_boundaries() {
        let now = Utc::now();

        let free = SafeRecord::free(1);
        assert_eq!(free.state_at(now), SafeState::Free);

        let reserved = SafeRecord {
            safe_id: 1,
            reserved_until: Some(now + Duration::minutes(5)),
            pin: Some("1234".to_string()),
        };
        assert_eq!(reserved.state_at(now), SafeState::Reserved);

        // The exact expiry instant counts as expired.
        let at_boundary = SafeRecord {
            safe_id: 1,
            reserved_until: Some(now),
            pin: Some("1234".to_string()),
        };
        assert_eq!(at_boundary.state_at(now), SafeState::Expired);

        let expired = SafeRecord {
            safe_id: 1,
            reserved_until: Some(now - Duration::minutes(1)),
            pin: Some("1234".to_string()),
        };
        assert_eq!(expired.state_at(now), SafeState::Expired);
    }

    #[test]
    fn consistency_check() {
        let mut safe = SafeRecord::free(3);
        assert!(safe.is_consistent());

        safe.pin = Some("1234".to_string());
        assert!(!safe.is_consistent());
    }
}
