//! # REST API Module
//!
//! This module defines all HTTP endpoints for the safe reservation API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/` | API information |
//! | GET | `/health` | Health check |
//! | GET | `/stations/{station_id}/safes` | List safes with reservation state |
//! | POST | `/stations/{station_id}/safes/reserve` | Reserve a safe |
//! | POST | `/stations/{station_id}/safes/unlock` | Unlock a safe |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```
//!
//! All `/stations/*` routes require a bearer token; it is verified
//! against the external auth service before the handler runs.

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
