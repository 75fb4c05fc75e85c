//! # Cluster Store
//!
//! SQLite home of the `address_clusters` relation. The relation is always
//! replaced as a whole inside one transaction, so readers see either the
//! previous run's rows or the new run's rows, never a mix.

use crate::error::Result;
use crate::model::ClusterAssignment;
use crate::writer::ClusterSink;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

/// SQLite-backed [`ClusterSink`].
pub struct SqliteClusterStore {
    conn: Connection,
}

impl SqliteClusterStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS address_clusters (
                address TEXT PRIMARY KEY,
                cluster_id TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_address_clusters_cluster
             ON address_clusters(cluster_id)",
            [],
        )?;
        Ok(())
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM address_clusters", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn cluster_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT cluster_id) FROM address_clusters",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Cluster label of `address`, if it was written.
    pub fn cluster_of(&self, address: &str) -> Result<Option<String>> {
        let cluster = self
            .conn
            .query_row(
                "SELECT cluster_id FROM address_clusters WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cluster)
    }

    /// Every stored row, ordered by address.
    pub fn assignments(&self) -> Result<Vec<ClusterAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT address, cluster_id, first_seen, last_seen
             FROM address_clusters ORDER BY address",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ClusterAssignment {
                    address: row.get(0)?,
                    cluster_id: row.get(1)?,
                    first_seen: row.get::<_, DateTime<Utc>>(2)?,
                    last_seen: row.get::<_, DateTime<Utc>>(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ClusterSink for SqliteClusterStore {
    /// Clear-then-load in one transaction. `first_seen` survives for
    /// addresses already present; dropping the transaction on any error
    /// rolls everything back.
    fn replace_all(
        &mut self,
        rows: &mut dyn Iterator<Item = Result<ClusterAssignment>>,
    ) -> Result<u64> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS prior_seen (
                address TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL
            );
            DELETE FROM temp.prior_seen;
            INSERT INTO temp.prior_seen (address, first_seen)
                SELECT address, first_seen FROM address_clusters;
            DELETE FROM address_clusters;",
        )?;

        let mut written = 0u64;
        {
            let mut insert = tx.prepare(
                "INSERT INTO address_clusters (address, cluster_id, first_seen, last_seen)
                 VALUES (
                    ?1, ?2,
                    COALESCE((SELECT first_seen FROM temp.prior_seen WHERE address = ?1), ?3),
                    ?4
                 )",
            )?;
            for row in rows {
                let row = row?;
                insert.execute(params![
                    row.address,
                    row.cluster_id,
                    row.first_seen,
                    row.last_seen
                ])?;
                written += 1;
            }
        }

        tx.execute("DELETE FROM temp.prior_seen", [])?;
        tx.commit()?;
        info!(rows = written, "address_clusters replaced");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use chrono::Duration;

    fn rows(pairs: &[(&str, &str)], at: DateTime<Utc>) -> Vec<Result<ClusterAssignment>> {
        pairs
            .iter()
            .map(|(address, cluster)| {
                Ok(ClusterAssignment::new(
                    address.to_string(),
                    cluster.to_string(),
                    at,
                ))
            })
            .collect()
    }

    #[test]
    fn test_replace_all_and_queries() {
        let mut store = SqliteClusterStore::in_memory().unwrap();
        let now = Utc::now();
        let written = store
            .replace_all(&mut rows(&[("a", "a"), ("b", "a"), ("c", "c")], now).into_iter())
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.cluster_count().unwrap(), 2);
        assert_eq!(store.cluster_of("b").unwrap().as_deref(), Some("a"));
        assert_eq!(store.cluster_of("zzz").unwrap(), None);

        let stored = store.assignments().unwrap();
        assert_eq!(stored[1].address, "b");
        assert_eq!(stored[1].last_seen, now);
    }

    #[test]
    fn test_replace_drops_stale_rows_and_keeps_first_seen() {
        let mut store = SqliteClusterStore::in_memory().unwrap();
        let first_run = Utc::now() - Duration::days(1);
        let second_run = Utc::now();
        store
            .replace_all(&mut rows(&[("a", "a"), ("b", "b")], first_run).into_iter())
            .unwrap();
        store
            .replace_all(&mut rows(&[("a", "a"), ("c", "a")], second_run).into_iter())
            .unwrap();

        let stored = store.assignments().unwrap();
        assert_eq!(stored.len(), 2);
        let a = &stored[0];
        assert_eq!(a.address, "a");
        assert_eq!(a.first_seen, first_run);
        assert_eq!(a.last_seen, second_run);
        let c = &stored[1];
        assert_eq!(c.address, "c");
        assert_eq!(c.first_seen, second_run);
        assert_eq!(store.cluster_of("b").unwrap(), None);
    }

    #[test]
    fn test_failed_replace_rolls_back() {
        let mut store = SqliteClusterStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .replace_all(&mut rows(&[("a", "a"), ("b", "a")], now).into_iter())
            .unwrap();

        let mut failing = rows(&[("x", "x"), ("y", "x")], now);
        failing.push(Err(ClusterError::UnknownAddress {
            address: "z".into(),
        }));
        let err = store.replace_all(&mut failing.into_iter()).unwrap_err();
        assert!(matches!(err, ClusterError::UnknownAddress { .. }));

        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.cluster_of("b").unwrap().as_deref(), Some("a"));
        assert_eq!(store.cluster_of("x").unwrap(), None);
    }

    #[test]
    fn test_duplicate_address_rolls_back() {
        let mut store = SqliteClusterStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .replace_all(&mut rows(&[("a", "a")], now).into_iter())
            .unwrap();
        let err = store
            .replace_all(&mut rows(&[("b", "b"), ("b", "b")], now).into_iter())
            .unwrap_err();
        assert!(matches!(err, ClusterError::Sqlite(_)));
        assert_eq!(store.cluster_of("a").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.sqlite");
        {
            let mut store = SqliteClusterStore::open(&path).unwrap();
            store
                .replace_all(&mut rows(&[("a", "a")], Utc::now()).into_iter())
                .unwrap();
        }
        let store = SqliteClusterStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
