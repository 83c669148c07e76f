//! # API Request Models
//!
//! Structures for incoming API request bodies.
//! Each struct represents the expected JSON body for an endpoint.

use serde::{Deserialize, Serialize};

/// Request to reserve a safe.
///
/// ## Example JSON
///
/// ```json
/// {
///     "safeId": 7,
///     "pin": "1234",
///     "durationMinutes": 30
/// }
/// ```
///
/// ## Notes
///
/// - `pin` must be 4-8 digits
/// - `durationMinutes` must be positive and below the configured maximum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveSafeRequest {
    /// Safe number within the station.
    pub safe_id: i32,

    /// PIN chosen by the client for this reservation.
    pub pin: String,

    /// Reservation window length in minutes.
    pub duration_minutes: i64,
}

/// Request to unlock a reserved safe.
///
/// ## Example JSON
///
/// ```json
/// {
///     "safeId": 7,
///     "pin": "1234"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockSafeRequest {
    /// Safe number within the station.
    pub safe_id: i32,

    /// PIN supplied when the safe was reserved.
    pub pin: String,
}
