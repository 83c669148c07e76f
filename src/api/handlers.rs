//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Verifies the caller's token against the auth service
//! 2. Extracts and validates request data
//! 3. Calls the reservation service
//! 4. Returns a formatted response
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "SAFE_ALREADY_RESERVED",
//!         "message": "Safe 7 is already reserved until ..."
//!     }
//! }
//! ```

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info};

use crate::auth::AuthError;
use crate::models::{
    ApiResponse, HealthResponse, ReserveSafeRequest, ReserveSafeResponse, SafeStatusResponse,
    StationSafesResponse, UnlockSafeRequest, UnlockSafeResponse,
};
use crate::services::ReservationError;
use crate::utils;
use crate::AppState;

/// Verify the request's bearer token against the auth service.
///
/// Returns the authenticated username, or the ready-to-send error
/// response (401 for missing/rejected tokens, 502 when the verifier is
/// unreachable).
async fn authenticate(state: &AppState, req: &HttpRequest) -> Result<String, HttpResponse> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    match state.auth.verify(token).await {
        Ok(user) => Ok(user.username),
        Err(e @ (AuthError::MissingToken | AuthError::InvalidToken | AuthError::InvalidUserInfo)) => {
            Err(HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("UNAUTHORIZED", &e.to_string())))
        }
        Err(e @ AuthError::Unavailable(_)) => {
            error!("Token verification failed upstream: {}", e);
            Err(HttpResponse::BadGateway()
                .json(ApiResponse::<()>::error("UPSTREAM_UNAVAILABLE", &e.to_string())))
        }
    }
}

/// Map a reservation error to its envelope code and HTTP status.
fn reservation_error_parts(e: &ReservationError) -> (&'static str, StatusCode) {
    match e {
        ReservationError::StationNotFound(_) => ("STATION_NOT_FOUND", StatusCode::NOT_FOUND),
        ReservationError::SafeNotFound { .. } => ("SAFE_NOT_FOUND", StatusCode::NOT_FOUND),
        ReservationError::AlreadyReserved { .. } => {
            ("SAFE_ALREADY_RESERVED", StatusCode::CONFLICT)
        }
        ReservationError::NotReserved(_) => ("SAFE_NOT_RESERVED", StatusCode::BAD_REQUEST),
        ReservationError::WrongPin(_) => ("WRONG_PIN", StatusCode::FORBIDDEN),
        ReservationError::InvalidInput(_) => ("INVALID_INPUT", StatusCode::BAD_REQUEST),
        ReservationError::StoreError(_) => {
            ("UPSTREAM_UNAVAILABLE", StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn reservation_error_response(e: &ReservationError) -> HttpResponse {
    let (code, status) = reservation_error_parts(e);
    HttpResponse::build(status).json(ApiResponse::<()>::error(code, &e.to_string()))
}

/// API information endpoint (root).
///
/// Returns information about available API endpoints.
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Station Safes API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Backend API for PIN-protected safe reservations",
        "endpoints": {
            "health": {
                "method": "GET",
                "path": "/health",
                "description": "Health check endpoint"
            },
            "stations": {
                "listSafes": {
                    "method": "GET",
                    "path": "/stations/{stationId}/safes",
                    "description": "List all safes with their reservation state"
                },
                "reserve": {
                    "method": "POST",
                    "path": "/stations/{stationId}/safes/reserve",
                    "description": "Reserve a safe for a bounded time with a PIN"
                },
                "unlock": {
                    "method": "POST",
                    "path": "/stations/{stationId}/safes/unlock",
                    "description": "Unlock a reserved safe using its PIN"
                }
            }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// Check if the backend is running and healthy.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "database": true,
///         "authService": true,
///         "version": "0.1.0",
///         "timestamp": "2026-08-07T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    // Check database
    let db_healthy = state.db.pool().get().await.is_ok();

    // Check auth service
    let auth_healthy = state.auth.is_reachable().await;

    let overall_healthy = db_healthy && auth_healthy;

    let response = HealthResponse {
        status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: db_healthy,
        auth_service: auth_healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// List a station's safes.
///
/// Returns the station address and every safe's current reservation
/// state. Stale (expired) entries are reported as free.
///
/// ## Endpoint
///
/// `GET /stations/{station_id}/safes`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/stations/station_1/safes \
///   -H "Authorization: Bearer <token>"
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "stationId": "station_1",
///         "address": "123 Main St, Cityville",
///         "safes": [
///             { "safeId": 1, "reserved": false, "reservedUntil": null }
///         ]
///     }
/// }
/// ```
pub async fn get_safes(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let username = match authenticate(&state, &req).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    let station_id = path.into_inner();
    info!("Safe listing request for {} by {}", station_id, username);

    match state.reservations.list_safes(&station_id).await {
        Ok(view) => {
            let response = StationSafesResponse {
                station_id: view.station_id,
                address: view.address,
                safes: view
                    .safes
                    .into_iter()
                    .map(|s| SafeStatusResponse {
                        safe_id: s.safe_id,
                        reserved: s.reserved,
                        reserved_until: s.reserved_until,
                    })
                    .collect(),
            };
            HttpResponse::Ok().json(ApiResponse::success(response))
        }
        Err(e) => {
            error!("Safe listing failed: {}", e);
            reservation_error_response(&e)
        }
    }
}

/// Reserve a safe.
///
/// Reserve a safe for a specified time with a PIN. Only the holder of
/// the PIN can unlock it before the window elapses; afterwards the
/// reservation is reclaimed automatically.
///
/// ## Endpoint
///
/// `POST /stations/{station_id}/safes/reserve`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/stations/station_1/safes/reserve \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "safeId": 7,
///     "pin": "1234",
///     "durationMinutes": 30
///   }'
/// ```
///
/// ## Response
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
///
/// ## Errors
///
/// - `SAFE_ALREADY_RESERVED` - Another reservation is active (409)
/// - `SAFE_NOT_FOUND` / `STATION_NOT_FOUND` - Unknown ids (404)
/// - `INVALID_DURATION` / `INVALID_PIN` - Malformed input (400)
pub async fn reserve_safe(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ReserveSafeRequest>,
) -> HttpResponse {
    let username = match authenticate(&state, &req).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    let station_id = path.into_inner();
    info!(
        "Reserve request: safe {} at {} for {} minutes by {}",
        body.safe_id, station_id, body.duration_minutes, username
    );

    // Validate duration
    if body.duration_minutes < 1 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "INVALID_DURATION",
            "Duration must be at least 1 minute",
        ));
    }
    if body.duration_minutes > state.config.max_reservation_minutes {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "INVALID_DURATION",
            &format!(
                "Duration must not exceed {} minutes",
                state.config.max_reservation_minutes
            ),
        ));
    }

    // Validate PIN shape
    if let Err(reason) = utils::validate_pin(&body.pin) {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("INVALID_PIN", &reason));
    }

    match state
        .reservations
        .reserve_safe(
            &station_id,
            body.safe_id,
            &body.pin,
            Duration::minutes(body.duration_minutes),
        )
        .await
    {
        Ok(reserved_until) => HttpResponse::Ok().json(ApiResponse::success(ReserveSafeResponse {
            safe_id: body.safe_id,
            reserved_until,
            message: "Safe reserved successfully".to_string(),
        })),
        Err(e) => {
            error!("Reserve failed: {}", e);
            reservation_error_response(&e)
        }
    }
}

/// Unlock a safe.
///
/// Unlock a reserved safe using its PIN. Expired reservations cannot be
/// unlocked — the stale PIN is refused.
///
/// ## Endpoint
///
/// `POST /stations/{station_id}/safes/unlock`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/stations/station_1/safes/unlock \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "safeId": 7,
///     "pin": "1234"
///   }'
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "safeId": 7,
///         "message": "Safe unlocked successfully"
///     }
/// }
/// ```
///
/// ## Errors
///
/// - `SAFE_NOT_RESERVED` - Safe is free or the reservation expired (400)
/// - `WRONG_PIN` - PIN mismatch (403)
/// - `SAFE_NOT_FOUND` / `STATION_NOT_FOUND` - Unknown ids (404)
pub async fn unlock_safe(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UnlockSafeRequest>,
) -> HttpResponse {
    let username = match authenticate(&state, &req).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    let station_id = path.into_inner();
    info!(
        "Unlock request: safe {} at {} by {}",
        body.safe_id, station_id, username
    );

    match state
        .reservations
        .unlock_safe(&station_id, body.safe_id, &body.pin)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(UnlockSafeResponse {
            safe_id: body.safe_id,
            message: "Safe unlocked successfully".to_string(),
        })),
        Err(e) => {
            error!("Unlock failed: {}", e);
            reservation_error_response(&e)
        }
    }
}
