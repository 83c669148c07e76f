//! # PostgreSQL Station Store
//!
//! Production [`StationStore`] backed by the deadpool connection pool.
//!
//! ## Conditional writes
//!
//! The update statement carries the full expected prior sub-record in its
//! `WHERE` clause (`IS NOT DISTINCT FROM` so NULL expiry/PIN compare as
//! equal). A row count of 1 means the swap applied; 0 means a concurrent
//! writer got there first (or the safe vanished) and the caller must
//! re-read. No transaction is needed — the single-row predicate update is
//! the atomic unit.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;

use super::models::{SafeRecord, StationRecord};
use super::{StationStore, StoreError, UpdateOutcome};

/// Helper to convert a safes row to a SafeRecord.
fn row_to_safe(row: &Row) -> SafeRecord {
    SafeRecord {
        safe_id: row.get("safe_id"),
        reserved_until: row.get("reserved_until"),
        pin: row.get("pin"),
    }
}

/// [`StationStore`] implementation on PostgreSQL.
#[derive(Clone)]
pub struct PostgresStationStore {
    /// Shared connection pool.
    pool: Pool,
}

impl PostgresStationStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StationStore for PostgresStationStore {
    async fn get_station(&self, station_id: &str) -> Result<Option<StationRecord>, StoreError> {
        debug!("Fetching station: {}", station_id);

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let station_rows = client
            .query(
                r#"
                SELECT station_id, address
                FROM stations
                WHERE station_id = $1
                "#,
                &[&station_id],
            )
            .await?;

        let Some(station_row) = station_rows.first() else {
            return Ok(None);
        };

        let safe_rows = client
            .query(
                r#"
                SELECT safe_id, reserved_until, pin
                FROM safes
                WHERE station_id = $1
                ORDER BY safe_id
                "#,
                &[&station_id],
            )
            .await?;

        Ok(Some(StationRecord {
            station_id: station_row.get("station_id"),
            address: station_row.get("address"),
            safes: safe_rows.iter().map(row_to_safe).collect(),
        }))
    }

    async fn conditional_update_safe(
        &self,
        station_id: &str,
        expected: &SafeRecord,
        new: &SafeRecord,
    ) -> Result<UpdateOutcome, StoreError> {
        debug!(
            "Conditional update for safe {} at station {}",
            expected.safe_id, station_id
        );

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let updated = client
            .execute(
                r#"
                UPDATE safes
                SET reserved_until = $3, pin = $4
                WHERE station_id = $1
                  AND safe_id = $2
                  AND reserved_until IS NOT DISTINCT FROM $5
                  AND pin IS NOT DISTINCT FROM $6
                "#,
                &[
                    &station_id,
                    &expected.safe_id,
                    &new.reserved_until,
                    &new.pin,
                    &expected.reserved_until,
                    &expected.pin,
                ],
            )
            .await?;

        if updated == 1 {
            Ok(UpdateOutcome::Applied)
        } else {
            Ok(UpdateOutcome::Conflict)
        }
    }
}
