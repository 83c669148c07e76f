//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "SAFE_ALREADY_RESERVED",
///         "message": "Safe 7 is already reserved until 2026-08-07T12:30:00Z"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "SAFE_ALREADY_RESERVED").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// One safe's reservation state as shown to clients.
///
/// The stored PIN is never exposed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeStatusResponse {
    /// Safe number within the station.
    pub safe_id: i32,

    /// Whether the safe is currently reserved.
    pub reserved: bool,

    /// Expiry of the active reservation, if any.
    pub reserved_until: Option<DateTime<Utc>>,
}

/// Station listing response.
///
/// Returned by `GET /stations/{station_id}/safes`
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "stationId": "station_1",
///         "address": "123 Main St, Cityville",
///         "safes": [
///             { "safeId": 1, "reserved": false, "reservedUntil": null },
///             { "safeId": 2, "reserved": true, "reservedUntil": "2026-08-07T12:30:00Z" }
///         ]
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSafesResponse {
    /// Station identifier.
    pub station_id: String,

    /// Station street address.
    pub address: String,

    /// Current state of every safe at the station.
    pub safes: Vec<SafeStatusResponse>,
}

/// Reservation confirmation.
///
/// Returned by `POST /stations/{station_id}/safes/reserve`
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "safeId": 7,
///         "reservedUntil": "2026-08-07T12:30:00Z",
///         "message": "Safe reserved successfully"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveSafeResponse {
    /// Safe number that was reserved.
    pub safe_id: i32,

    /// When the reservation ends.
    pub reserved_until: DateTime<Utc>,

    /// Human-readable status message.
    pub message: String,
}

/// Unlock confirmation.
///
/// Returned by `POST /stations/{station_id}/safes/unlock`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockSafeResponse {
    /// Safe number that was unlocked.
    pub safe_id: i32,

    /// Human-readable status message.
    pub message: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Database connection status.
    pub database: bool,

    /// Auth service reachability.
    pub auth_service: bool,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}
