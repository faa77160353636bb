//! SQLite storage backend
//!
//! One database file holds both collaborators: the `entities` table plays the
//! similarity store (exhaustive cosine kNN over stored embeddings) and
//! `table_rows` plays the tabular pairing store.

use super::memory::rank_nearest;
use super::traits::{
    BulkUpsert, Cell, MetadataPatch, Neighbor, OpenStore, PairingStore, Row, SimilarityStore,
    StorageError, StorageResult, DEFAULT_FETCH_LIMIT,
};
use crate::graph::Entity;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Busy timeout applied when a store is opened through `OpenStore`
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata key carrying an entity's past partners
const PAST_PAIRINGS_KEY: &str = "pastPairings";

/// SQLite-backed similarity and pairing store
///
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    fetch_limit: usize,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Entities: embedding plus free-form metadata (pastPairings lives here)
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                embedding_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Tabular rows keyed by the JSON of their key-column values
            CREATE TABLE IF NOT EXISTS table_rows (
                table_id TEXT NOT NULL,
                row_key TEXT NOT NULL,
                cells_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (table_id, row_key)
            );

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            fetch_limit: DEFAULT_FETCH_LIMIT,
        })
    }

    /// Apply a busy timeout and fetch limit
    pub fn with_limits(mut self, timeout: Duration, fetch_limit: usize) -> StorageResult<Self> {
        self.conn
            .get_mut()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))?
            .busy_timeout(timeout)?;
        self.fetch_limit = fetch_limit;
        Ok(self)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Insert or replace an entity, keeping any metadata keys other than the partner list
    pub fn upsert_entity(&self, entity: &Entity) -> StorageResult<()> {
        let conn = self.lock()?;
        let mut metadata = Self::load_metadata(&conn, &entity.id)?.unwrap_or_default();
        metadata.insert(
            PAST_PAIRINGS_KEY.to_string(),
            serde_json::to_value(&entity.partners)?,
        );
        conn.execute(
            r#"
            INSERT INTO entities (id, embedding_json, metadata_json, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                embedding_json = excluded.embedding_json,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
            params![
                entity.id,
                serde_json::to_string(&entity.embedding)?,
                serde_json::to_string(&metadata)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_metadata(conn: &Connection, id: &str) -> StorageResult<Option<Map<String, Value>>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT metadata_json FROM entities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StorageError::from))
            .transpose()
    }

    /// Deserialize an entity from database columns
    fn row_to_entity(id: String, embedding_json: &str, metadata_json: &str) -> StorageResult<Entity> {
        let embedding: Vec<f32> = serde_json::from_str(embedding_json)?;
        let metadata: Map<String, Value> = serde_json::from_str(metadata_json)?;
        let partners = match metadata.get(PAST_PAIRINGS_KEY) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Default::default(),
        };
        Ok(Entity {
            id,
            embedding,
            partners,
        })
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl SimilarityStore for SqliteStore {
    fn fetch_all(&self) -> StorageResult<Vec<Entity>> {
        let conn = self.lock()?;
        let found: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        let found = found as usize;
        if found > self.fetch_limit {
            return Err(StorageError::LimitExceeded {
                limit: self.fetch_limit,
                found,
            });
        }

        let mut stmt =
            conn.prepare("SELECT id, embedding_json, metadata_json FROM entities ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entities = Vec::with_capacity(found);
        for row in rows {
            let (id, embedding_json, metadata_json) = row?;
            entities.push(Self::row_to_entity(id, &embedding_json, &metadata_json)?);
        }
        Ok(entities)
    }

    fn query_nearest(&self, vector: &[f32], k: usize) -> StorageResult<Vec<Neighbor>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, embedding_json FROM entities")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut candidates: Vec<(String, Vec<f32>)> = Vec::new();
        for row in rows {
            let (id, embedding_json) = row?;
            candidates.push((id, serde_json::from_str(&embedding_json)?));
        }
        rank_nearest(
            candidates.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            vector,
            k,
        )
    }

    fn upsert_metadata(&self, id: &str, patch: &MetadataPatch) -> StorageResult<()> {
        let conn = self.lock()?;
        let mut metadata =
            Self::load_metadata(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if let Value::Object(fields) = serde_json::to_value(patch)? {
            metadata.extend(fields);
        }
        conn.execute(
            "UPDATE entities SET metadata_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&metadata)?,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }
}

impl PairingStore for SqliteStore {
    fn bulk_upsert(&self, table: &str, request: &BulkUpsert) -> StorageResult<usize> {
        let keys = request.row_keys()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut accepted = 0;
        for (key, row) in keys.iter().zip(request.rows.iter()) {
            accepted += tx.execute(
                r#"
                INSERT INTO table_rows (table_id, row_key, cells_json, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(table_id, row_key) DO UPDATE SET
                    cells_json = excluded.cells_json,
                    updated_at = excluded.updated_at
                "#,
                params![table, key, serde_json::to_string(&row.cells)?, now],
            )?;
        }
        tx.commit()?;
        Ok(accepted)
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT cells_json FROM table_rows WHERE table_id = ?1 ORDER BY row_key")?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;

        let mut result = Vec::new();
        for cells_json in rows {
            let cells: Vec<Cell> = serde_json::from_str(&cells_json?)?;
            result.push(Row { cells });
        }
        Ok(result)
    }

    fn row_count(&self, table: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM table_rows WHERE table_id = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
