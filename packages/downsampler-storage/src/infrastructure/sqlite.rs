//! SQLite adapter for QueryStore
//!
//! One row per query: the indexed `query_state` column drives the state
//! filters, the `document` column holds the whole JSON document.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::domain::{DownsamplingQuery, QueryState, QueryStore, QUERY_TABLE};
use crate::{Result, StorageError};

pub struct SqliteQueryStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteQueryStore {
    /// Open (or create) the store at `path`; `table_prefix` is prepended to the
    /// base table name.
    pub fn open(path: impl AsRef<Path>, table_prefix: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, table_prefix)
    }

    pub fn open_in_memory(table_prefix: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, table_prefix)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> Result<Self> {
        let table = table_name(table_prefix)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                query_id    TEXT PRIMARY KEY,
                query_state TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                document    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"{table}_state\" ON \"{table}\" (query_state);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

fn table_name(prefix: &str) -> Result<String> {
    let valid = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(StorageError::config(format!(
            "Invalid table prefix {:?}: only [A-Za-z0-9_-] allowed",
            prefix
        )));
    }
    Ok(format!("{}{}", prefix, QUERY_TABLE))
}

fn decode(query_id: &str, document: &str) -> Result<DownsamplingQuery> {
    serde_json::from_str(document).map_err(|e| StorageError::corrupt(query_id, &e).with_source(e))
}

#[async_trait]
impl QueryStore for SqliteQueryStore {
    async fn list_by_state(&self, state: QueryState) -> Result<Vec<DownsamplingQuery>> {
        self.list_by_states(&[state]).await
    }

    async fn list_by_states(&self, states: &[QueryState]) -> Result<Vec<DownsamplingQuery>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT query_id, document FROM \"{}\" WHERE query_state IN ({}) ORDER BY created_at, query_id",
            self.table, placeholders
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(states.iter().map(|s| s.as_str())), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(query_id, document)| decode(query_id, document))
            .collect()
    }

    async fn get(&self, query_id: &str) -> Result<Option<DownsamplingQuery>> {
        let conn = self.conn.lock();
        let document: Option<String> = conn
            .query_row(
                &format!("SELECT document FROM \"{}\" WHERE query_id = ?1", self.table),
                params![query_id],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|doc| decode(query_id, &doc)).transpose()
    }

    async fn put(&self, query: &DownsamplingQuery) -> Result<()> {
        let document = serde_json::to_string(query)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\" (query_id, query_state, created_at, document)
                 VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![
                query.query_id,
                query.query_state.as_str(),
                query.created_at,
                document
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, query_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE query_id = ?1", self.table),
            params![query_id],
        )?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AggregationField;
    use crate::ErrorKind;
    use chrono::{Duration, Utc};

    fn query(id: &str, state: QueryState) -> DownsamplingQuery {
        DownsamplingQuery::new(id, "omni", "nsa_duration", state)
            .with_interval(60)
            .with_field(AggregationField::new("sum_count", "count", "SUM"))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_keeps_document() {
        let store = SqliteQueryStore::open_in_memory("test_").unwrap();
        let q = query("197601d5", QueryState::Pending).with_tag("host");

        store.put(&q).await.unwrap();

        let loaded = store.get("197601d5").await.unwrap().unwrap();
        assert_eq!(loaded, q);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = SqliteQueryStore::open_in_memory("").unwrap();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_replaces_whole_document() {
        let store = SqliteQueryStore::open_in_memory("").unwrap();
        let mut q = query("q1", QueryState::Pending);
        store.put(&q).await.unwrap();

        q.query_state = QueryState::Deployed;
        q.fields.clear();
        store.put(&q).await.unwrap();

        let loaded = store.get("q1").await.unwrap().unwrap();
        assert_eq!(loaded.query_state, QueryState::Deployed);
        assert!(loaded.fields.is_empty());
        assert!(store.list_by_state(QueryState::Pending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_actionable_ordered_by_creation() {
        let store = SqliteQueryStore::open_in_memory("").unwrap();
        let now = Utc::now();

        store
            .put(&query("newer", QueryState::Pending).with_created_at(now))
            .await
            .unwrap();
        store
            .put(&query("older", QueryState::Deleted).with_created_at(now - Duration::hours(1)))
            .await
            .unwrap();
        store
            .put(&query("live", QueryState::Deployed).with_created_at(now - Duration::hours(2)))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_actionable()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.query_id)
            .collect();
        assert_eq!(ids, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = SqliteQueryStore::open_in_memory("").unwrap();
        store.put(&query("q1", QueryState::Deleted)).await.unwrap();

        store.delete("q1").await.unwrap();
        store.delete("q1").await.unwrap();
        assert_eq!(store.get("q1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let store = SqliteQueryStore::open_in_memory("").unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                &format!(
                    "INSERT INTO \"{}\" (query_id, query_state, created_at, document) VALUES ('bad', 'PENDING', '0', '{{}}')",
                    store.table()
                ),
                [],
            )
            .unwrap();
        }

        let err = store.get("bad").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corrupt);
        assert!(err.message.contains("bad"));
    }

    #[test]
    fn test_table_prefix_validation() {
        assert!(SqliteQueryStore::open_in_memory("prod_").is_ok());
        let err = SqliteQueryStore::open_in_memory("x\"; DROP").err().unwrap();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.db");

        {
            let store = SqliteQueryStore::open(&path, "dev_").unwrap();
            store.put(&query("q1", QueryState::PreviewPending)).await.unwrap();
        }

        let reopened = SqliteQueryStore::open(&path, "dev_").unwrap();
        assert_eq!(reopened.table(), "dev_metrics_downsample_queries");
        let loaded = reopened.get("q1").await.unwrap().unwrap();
        assert_eq!(loaded.query_state, QueryState::PreviewPending);
        reopened.ping().await.unwrap();
    }
}
