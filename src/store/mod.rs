//! # Station Store
//!
//! This module handles persistence for the reservation backend. Station
//! and safe records live in PostgreSQL:
//!
//! - Station records (id + address)
//! - Safe sub-records (reservation expiry + PIN per safe)
//!
//! ## The `StationStore` contract
//!
//! All mutation goes through [`StationStore::conditional_update_safe`], a
//! compare-and-swap on the full prior safe sub-record. A read plus that
//! conditional write form the atomic unit for every reserve, unlock and
//! reclaim; two writers racing on the same safe cannot silently overwrite
//! each other — the loser observes [`UpdateOutcome::Conflict`] and re-reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        STORE LAYER                               │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                 StationStore (trait)                      │   │
//! │  │   get_station()        conditional_update_safe()          │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │            │                                │                    │
//! │            ▼                                ▼                    │
//! │  ┌──────────────────┐            ┌──────────────────┐           │
//! │  │ PostgresStation  │            │ MemoryStation    │           │
//! │  │ Store            │            │ Store (tests,    │           │
//! │  │ (deadpool pool)  │            │ local dev)       │           │
//! │  └──────────────────┘            └──────────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#[allow(dead_code)]
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use thiserror::Error;
use tokio_postgres::{Config as TokioConfig, NoTls};
use tracing::{debug, info, warn};

pub use models::{SafeRecord, SafeState, StationRecord};

/// Store-related errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to connect to the database
    #[error("Store connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Outcome of a conditional safe update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The prior state matched and the new state was written.
    Applied,
    /// The safe no longer matches the expected prior state
    /// (a concurrent writer won the race, or the row is gone).
    Conflict,
}

/// Contract for station/safe persistence backends.
///
/// `conditional_update_safe` only applies `new` if the stored sub-record
/// still equals `expected` — optimistic concurrency keyed on the safe's
/// identity within its station.
#[async_trait]
pub trait StationStore: Send + Sync {
    /// Fetch a station with all of its safes. `Ok(None)` if unknown.
    async fn get_station(&self, station_id: &str) -> Result<Option<StationRecord>, StoreError>;

    /// Replace one safe's sub-record iff it still matches `expected`.
    async fn conditional_update_safe(
        &self,
        station_id: &str,
        expected: &SafeRecord,
        new: &SafeRecord,
    ) -> Result<UpdateOutcome, StoreError>;
}

/// Database connection wrapper.
///
/// Wraps the deadpool-postgres pool and owns schema bootstrap.
///
/// ## Usage
///
/// ```rust,ignore
/// let db = Database::connect("postgres://...").await?;
/// db.run_migrations().await?;
/// let store = PostgresStationStore::new(db.pool().clone());
/// ```
#[derive(Clone)]
pub struct Database {
    /// The connection pool
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// Creates a connection pool with sensible defaults (max 10
    /// connections) and verifies connectivity with a probe query.
    ///
    /// ## Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        // Parse the connection string using tokio_postgres::Config
        let tokio_config = database_url
            .parse::<TokioConfig>()
            .map_err(|e| StoreError::ConfigError(format!("Invalid database URL: {}", e)))?;

        // Convert to deadpool config
        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(host) = tokio_config.get_hosts().first() {
            if let tokio_postgres::config::Host::Tcp(host_str) = host {
                config.host = Some(host_str.clone());
            }
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size: 10,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// Executes `migrations/001_initial_schema.sql`, which creates the
    /// stations/safes tables and seeds the demo stations. The script is
    /// written to be re-runnable (`IF NOT EXISTS` / `ON CONFLICT DO
    /// NOTHING`), so duplicate-object errors from earlier runs are
    /// tolerated.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let migration_paths = [
            "migrations/001_initial_schema.sql",
            "../migrations/001_initial_schema.sql",
        ];

        let mut migration_sql = None;
        for path in &migration_paths {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!("Found migration file at: {}", path);
                    migration_sql = Some(content);
                    break;
                }
                Err(e) => {
                    debug!("Tried path '{}': {}", path, e);
                }
            }
        }

        let migration_sql = migration_sql.ok_or_else(|| {
            StoreError::MigrationError(format!(
                "Could not find migration file. Tried paths: {:?}",
                migration_paths
            ))
        })?;

        match client.batch_execute(&migration_sql).await {
            Ok(_) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                // 42P07 = duplicate_table, 42710 = duplicate_object
                let is_duplicate = e
                    .code()
                    .map(|c| c.code() == "42P07" || c.code() == "42710")
                    .unwrap_or(false)
                    || error_msg.contains("already exists");

                if is_duplicate {
                    warn!("Some database objects already exist. This is OK if migrations were run before.");
                    Ok(())
                } else {
                    Err(StoreError::MigrationError(error_msg))
                }
            }
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}
