//! Relational store for published catalogue records.
//!
//! One table, `catalogue_images`, keyed by `(store_name, page_number)`. The
//! rows for a retailer are always the full current snapshot; they are only
//! ever replaced as a set.

use crate::error::StoreError;
use crate::types::{PublishedArtifact, RetailerId};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS catalogue_images (
    store_name TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    image_reference TEXT NOT NULL,
    week_date TEXT NOT NULL,
    PRIMARY KEY (store_name, page_number)
);";

/// A persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogueRecord {
    pub store_name: String,
    pub page_number: u32,
    pub image_reference: String,
    pub week_date: NaiveDate,
}

/// Store operations the publisher and the CLI need.
pub trait CatalogueStore: Send + Sync {
    /// Delete every row for `retailer` and insert `artifacts`, as one transaction.
    ///
    /// If the delete fails nothing changes. If an insert fails the retailer is
    /// left with zero rows and the error is returned.
    fn replace_snapshot(
        &self,
        retailer: &RetailerId,
        artifacts: &[PublishedArtifact],
    ) -> Result<(), StoreError>;

    /// Rows for `retailer`, ordered by page number.
    fn records(&self, retailer: &RetailerId) -> Result<Vec<CatalogueRecord>, StoreError>;

    fn count(&self, retailer: &RetailerId) -> Result<usize, StoreError>;

    /// Cheap round trip proving the store answers queries.
    fn ping(&self) -> Result<(), StoreError>;
}

/// SQLite-backed store. Safe to share across concurrent retailer pipelines;
/// each transaction only touches one retailer's rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn insert_all(
    tx: &mut Transaction<'_>,
    retailer: &RetailerId,
    artifacts: &[PublishedArtifact],
) -> Result<(), StoreError> {
    // Dropping the savepoint on error rolls the inserts back but keeps the delete.
    let sp = tx.savepoint()?;
    {
        let mut stmt = sp.prepare(
            "INSERT INTO catalogue_images (store_name, page_number, image_reference, week_date)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for artifact in artifacts {
            stmt.execute(params![
                retailer.as_str(),
                artifact.page_index,
                artifact.reference_path,
                artifact.week_date
            ])?;
        }
    }
    sp.commit()?;
    Ok(())
}

impl CatalogueStore for SqliteStore {
    fn replace_snapshot(
        &self,
        retailer: &RetailerId,
        artifacts: &[PublishedArtifact],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let mut tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM catalogue_images WHERE store_name = ?1",
            params![retailer.as_str()],
        )?;

        match insert_all(&mut tx, retailer, artifacts) {
            Ok(()) => {
                tx.commit()?;
                tracing::debug!(
                    retailer = %retailer,
                    deleted,
                    inserted = artifacts.len(),
                    "store snapshot replaced"
                );
                Ok(())
            }
            Err(e) => {
                // Empty beats stale: keep the delete.
                tx.commit()?;
                tracing::warn!(retailer = %retailer, deleted, "store insert failed: {e}");
                Err(e)
            }
        }
    }

    fn records(&self, retailer: &RetailerId) -> Result<Vec<CatalogueRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT store_name, page_number, image_reference, week_date
             FROM catalogue_images WHERE store_name = ?1 ORDER BY page_number",
        )?;
        let rows = stmt
            .query_map(params![retailer.as_str()], |row| {
                Ok(CatalogueRecord {
                    store_name: row.get(0)?,
                    page_number: row.get(1)?,
                    image_reference: row.get(2)?,
                    week_date: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, retailer: &RetailerId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM catalogue_images WHERE store_name = ?1",
            params![retailer.as_str()],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
