//! # Station Safes Backend Service
//!
//! This is the main entry point for the backend service that manages
//! PIN-protected safe reservations across stations. It provides:
//!
//! - REST API for clients (list safes, reserve, unlock)
//! - Automatic release of expired reservations
//! - Token verification against an external auth service
//! - PostgreSQL storage for station and safe state
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌───────────────┐  ┌───────────────────────┐  │
//! │  │  REST API   │  │  Auth Client  │  │  Background Services  │  │
//! │  │  (Actix)    │  │               │  │  • Expiry Dispatcher  │  │
//! │  │             │  │  /verify ──▶  │  │    (deadline queue,   │  │
//! │  │  /safes     │  │  auth service │  │     reclaim tasks)    │  │
//! │  │  /reserve   │  │               │  │                       │  │
//! │  │  /unlock    │  │               │  │                       │  │
//! │  └─────────────┘  └───────────────┘  └───────────────────────┘  │
//! │         │                                      │                 │
//! │  ┌──────┴──────────────────────────────────────┴─────────────┐  │
//! │  │                     SERVICE LAYER                          │  │
//! │  │  ┌────────────────────┐  ┌──────────────────────────┐     │  │
//! │  │  │ ReservationService │  │ reservation_engine (pure) │     │  │
//! │  │  └────────────────────┘  └──────────────────────────┘     │  │
//! │  └────────────────────────────┬───────────────────────────────┘ │
//! │                               │                                  │
//! │                        ┌──────┴──────┐                           │
//! │                        │  PostgreSQL │                           │
//! │                        │  (stations, │                           │
//! │                        │   safes)    │                           │
//! │                        └─────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Configure the environment (see below)
//! 3. Start the server: `cargo run`
//!
//! ## Environment Variables
//!
//! See `src/config/mod.rs` for all supported configuration.

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod api;
mod auth;
mod config;
mod models;
mod services;
mod store;
mod utils;

use auth::AuthClient;
use config::AppConfig;
use services::{ExpiryScheduler, ReservationService};
use store::postgres::PostgresStationStore;
use store::{Database, StationStore};

/// Application state shared across all handlers.
///
/// This struct contains all the shared resources that API handlers
/// need access to. It sits behind an `Arc` so every worker thread
/// shares the same pool, client and service instances.
pub struct AppState {
    /// Database connection pool for PostgreSQL
    pub db: Database,

    /// Client for the external identity verifier
    pub auth: AuthClient,

    /// Safe reservation service
    pub reservations: ReservationService,

    /// Application configuration
    pub config: AppConfig,
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Initializes database connection and schema
/// 3. Sets up the auth client
/// 4. Starts the expiry dispatcher in the background
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("🚀 Starting Station Safes Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");

    info!("📋 Configuration loaded");
    info!("   Auth service: {}", config.auth_service_url);
    info!(
        "   Max reservation window: {} minutes",
        config.max_reservation_minutes
    );

    // =========================================
    // STEP 3: Initialize Database
    // =========================================
    let db = Database::connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    info!("🗄️  Database connected");

    // Run migrations to ensure schema and seed data are in place
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    info!("📦 Database migrations complete");

    // =========================================
    // STEP 4: Initialize Auth Client
    // =========================================
    let auth = AuthClient::new(&config.auth_service_url)
        .expect("Failed to create auth client");

    info!("🔑 Auth client initialized");

    // =========================================
    // STEP 5: Initialize Services
    // =========================================
    let station_store: Arc<dyn StationStore> =
        Arc::new(PostgresStationStore::new(db.pool().clone()));

    let (scheduler, dispatcher) = ExpiryScheduler::new(
        station_store.clone(),
        config.reclaim_retry_attempts,
        config.reclaim_retry_delay_ms,
    );

    let reservations = ReservationService::new(
        station_store,
        scheduler,
        config.max_reservation_minutes,
    );

    info!("🔧 Services initialized");

    // =========================================
    // STEP 6: Start Background Services
    // =========================================
    // The dispatcher sleeps until the next reservation expiry and
    // spawns one reclaim unit per due entry.
    tokio::spawn(dispatcher.run());

    info!("⏰ Expiry dispatcher started");

    // =========================================
    // STEP 7: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        db: db.clone(),
        auth: auth.clone(),
        reservations,
        config: config.clone(),
    });

    // =========================================
    // STEP 8: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))
            // Add logging middleware
            .wrap(middleware::Logger::default())
            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
