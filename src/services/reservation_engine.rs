//! # Reservation Engine
//!
//! Pure state-transition logic for a single safe. Every function takes a
//! safe snapshot plus "now" and returns either the updated record or a
//! rejection — no I/O, no clock mutation. The service layer pairs each
//! transition with a conditional store write, so the snapshot passed in
//! here doubles as the expected prior state for the swap.
//!
//! ## State Machine
//!
//! ```text
//!              reserve(pin, duration)
//!        ┌───────────────────────────────┐
//!        │                               ▼
//!   ┌─────────┐                    ┌──────────┐
//!   │  Free   │                    │ Reserved │
//!   └─────────┘                    └──────────┘
//!        ▲                            │     │
//!        │   unlock(correct pin)      │     │ expiry passes
//!        ├────────────────────────────┘     ▼
//!        │                            ┌──────────┐
//!        │  reclaim / normalize /     │ Expired  │
//!        └────────────────────────────│ (stale)  │
//!           reserve (treated as Free) └──────────┘
//! ```
//!
//! A safe whose expiry has passed but was never cleared ("Expired") is
//! reservable by the next caller and refuses its stale PIN; the scheduled
//! reclaim merely tidies the record.

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

use crate::store::{SafeRecord, SafeState};

/// Deterministic rejections produced by the engine.
///
/// These map 1:1 onto caller-visible outcomes; the service layer attaches
/// station/safe context and HTTP codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The safe is reserved and its window has not elapsed.
    AlreadyReserved {
        /// When the blocking reservation ends.
        until: DateTime<Utc>,
    },
    /// Unlock attempted on a free or expired safe.
    NotReserved,
    /// Supplied PIN does not match the reservation's PIN.
    WrongPin,
}

/// Outcome of a successful reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserved {
    /// The safe with the new reservation applied.
    pub safe: SafeRecord,
    /// When the reservation ends.
    pub reserved_until: DateTime<Utc>,
}

/// Reserve a safe with `pin` for `duration`, evaluated at `now`.
///
/// A currently-reserved safe (expiry strictly in the future) rejects with
/// [`Rejection::AlreadyReserved`]. An expired-but-uncollected safe is
/// treated as free and re-reserved in place — the old record is simply
/// overwritten, and a late reclaim against the old expiry no-ops on its
/// precondition.
///
/// The caller validates `duration > 0`.
pub fn reserve(
    safe: &SafeRecord,
    pin: &str,
    duration: Duration,
    now: DateTime<Utc>,
) -> Result<Reserved, Rejection> {
    debug_assert!(duration > Duration::zero());

    if let Some(until) = safe.reserved_until {
        if now < until {
            return Err(Rejection::AlreadyReserved { until });
        }
        // Expired-but-uncollected: fall through and overwrite in place.
    }

    let reserved_until = truncate_to_millis(now + duration);
    Ok(Reserved {
        safe: SafeRecord {
            safe_id: safe.safe_id,
            reserved_until: Some(reserved_until),
            pin: Some(pin.to_string()),
        },
        reserved_until,
    })
}

/// Unlock a reserved safe with `supplied_pin`, evaluated at `now`.
///
/// Free and expired safes reject with [`Rejection::NotReserved`] — a
/// stale PIN must not open a safe after its window has elapsed. The PIN
/// comparison is constant-time so the check leaks nothing about how much
/// of the PIN matched.
pub fn unlock(
    safe: &SafeRecord,
    supplied_pin: &str,
    now: DateTime<Utc>,
) -> Result<SafeRecord, Rejection> {
    match safe.state_at(now) {
        SafeState::Free | SafeState::Expired => Err(Rejection::NotReserved),
        SafeState::Reserved => {
            let stored = safe.pin.as_deref().unwrap_or("");
            if !pins_match(stored, supplied_pin) {
                return Err(Rejection::WrongPin);
            }
            Ok(SafeRecord::free(safe.safe_id))
        }
    }
}

/// Reclaim an expired reservation, evaluated at `now`.
///
/// Returns the cleared record only when the safe is still holding the
/// exact reservation the reclaim was scheduled for (`reserved_until ==
/// expected_expiry`) and that instant has passed. Any other state —
/// already unlocked, re-reserved with a newer expiry, not yet due —
/// returns `None` and the caller does nothing. Safe to invoke any number
/// of times.
pub fn reclaim(
    safe: &SafeRecord,
    expected_expiry: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<SafeRecord> {
    match safe.reserved_until {
        Some(until) if until == expected_expiry && until <= now => {
            Some(SafeRecord::free(safe.safe_id))
        }
        _ => None,
    }
}

/// Constant-time PIN equality.
fn pins_match(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Truncate a timestamp to whole milliseconds.
///
/// The reclaim precondition compares the stored expiry against the
/// scheduled one for exact equality, and the store round-trips
/// timestamps at coarser-than-nanosecond precision. Creating expiries
/// on a millisecond boundary keeps that comparison exact.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let sub_ms_nanos = ts.timestamp_subsec_nanos() % 1_000_000;
    ts - Duration::nanoseconds(i64::from(sub_ms_nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved_safe(id: i32, pin: &str, until: DateTime<Utc>) -> SafeRecord {
        SafeRecord {
            safe_id: id,
            reserved_until: Some(until),
            pin: Some(pin.to_string()),
        }
    }

    #[test]
    fn reserve_free_safe_sets_expiry_and_pin() {
        let now = Utc::now();
        let safe = SafeRecord::free(7);

        let out = reserve(&safe, "1234", Duration::minutes(1), now).unwrap();

        assert_eq!(
            out.reserved_until,
            truncate_to_millis(now + Duration::minutes(1))
        );
        assert_eq!(out.safe.reserved_until, Some(out.reserved_until));
        assert_eq!(out.safe.pin.as_deref(), Some("1234"));
        assert!(out.safe.is_consistent());
    }

    #[test]
    fn reserve_produces_millisecond_aligned_expiry() {
        let now = Utc::now();
        let out = reserve(&SafeRecord::free(7), "1234", Duration::minutes(1), now).unwrap();

        assert_eq!(out.reserved_until.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn reserve_reserved_safe_conflicts() {
        let now = Utc::now();
        let until = now + Duration::minutes(5);
        let safe = reserved_safe(7, "1234", until);

        let err = reserve(&safe, "9999", Duration::minutes(1), now).unwrap_err();
        assert_eq!(err, Rejection::AlreadyReserved { until });
    }

    #[test]
    fn reserve_expired_safe_is_treated_as_free() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now - Duration::minutes(1));

        let out = reserve(&safe, "5678", Duration::minutes(2), now).unwrap();
        assert_eq!(out.safe.pin.as_deref(), Some("5678"));
        assert_eq!(
            out.reserved_until,
            truncate_to_millis(now + Duration::minutes(2))
        );
    }

    #[test]
    fn reserve_at_exact_expiry_instant_succeeds() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now);

        assert!(reserve(&safe, "5678", Duration::minutes(1), now).is_ok());
    }

    #[test]
    fn unlock_with_correct_pin_clears_state() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now + Duration::minutes(5));

        let cleared = unlock(&safe, "1234", now).unwrap();
        assert_eq!(cleared, SafeRecord::free(7));
        assert!(cleared.is_consistent());
    }

    #[test]
    fn unlock_with_wrong_pin_is_rejected() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now + Duration::minutes(5));

        assert_eq!(unlock(&safe, "0000", now).unwrap_err(), Rejection::WrongPin);
        // Length mismatch takes the same path.
        assert_eq!(
            unlock(&safe, "123456", now).unwrap_err(),
            Rejection::WrongPin
        );
    }

    #[test]
    fn unlock_free_safe_is_not_reserved() {
        let now = Utc::now();
        let safe = SafeRecord::free(7);

        assert_eq!(unlock(&safe, "1234", now).unwrap_err(), Rejection::NotReserved);
    }

    #[test]
    fn unlock_expired_safe_refuses_stale_pin() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now - Duration::seconds(1));

        assert_eq!(unlock(&safe, "1234", now).unwrap_err(), Rejection::NotReserved);
    }

    #[test]
    fn unlock_at_exact_expiry_instant_is_not_reserved() {
        let now = Utc::now();
        let safe = reserved_safe(7, "1234", now);

        assert_eq!(unlock(&safe, "1234", now).unwrap_err(), Rejection::NotReserved);
    }

    #[test]
    fn reclaim_clears_matching_expired_reservation() {
        let now = Utc::now();
        let expiry = now - Duration::seconds(30);
        let safe = reserved_safe(7, "1234", expiry);

        let cleared = reclaim(&safe, expiry, now).unwrap();
        assert_eq!(cleared, SafeRecord::free(7));
    }

    #[test]
    fn reclaim_is_idempotent() {
        let now = Utc::now();
        let expiry = now - Duration::seconds(30);
        let safe = reserved_safe(7, "1234", expiry);

        let cleared = reclaim(&safe, expiry, now).unwrap();
        // Second attempt sees the cleared record and no-ops.
        assert!(reclaim(&cleared, expiry, now).is_none());
    }

    #[test]
    fn reclaim_never_clobbers_newer_reservation() {
        let now = Utc::now();
        let old_expiry = now - Duration::minutes(1);
        // Re-reserved after the original window: different expiry.
        let safe = reserved_safe(7, "5678", now + Duration::minutes(5));

        assert!(reclaim(&safe, old_expiry, now).is_none());
    }

    #[test]
    fn reclaim_before_expiry_is_a_no_op() {
        let now = Utc::now();
        let expiry = now + Duration::minutes(1);
        let safe = reserved_safe(7, "1234", expiry);

        // Fired early (clock skew); must not clear a live reservation.
        assert!(reclaim(&safe, expiry, now).is_none());
    }
}
