//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                      GET - Health check
/// └── /stations/{station_id}
///     └── /safes
///         ├── ""                   GET  - List safes
///         ├── /reserve             POST - Reserve a safe
///         └── /unlock              POST - Unlock a safe
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))
        // Station endpoints
        .service(
            web::scope("/stations/{station_id}")
                // List all safes with reservation state
                .route("/safes", web::get().to(handlers::get_safes))
                // Reserve a safe for a bounded window
                .route("/safes/reserve", web::post().to(handlers::reserve_safe))
                // Unlock a reserved safe with its PIN
                .route("/safes/unlock", web::post().to(handlers::unlock_safe)),
        );
}
