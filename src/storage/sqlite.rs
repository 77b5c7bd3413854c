//! SQLite storage backend
//!
//! Every entity table stores the canonical row as a JSON document. Lookups go
//! through `json_extract` expression indexes, so the same backend serves both
//! the document store and the relational mirror, whose detections are keyed
//! by survey oid.
//!
//! Detections carry a unique `(owner, candid)` index and are written with
//! `INSERT OR IGNORE`: the first stored version of a detection always wins.

use super::{rank_by_distance, EntityKind, Filter, Row, StorageBackend, StoreError, StoreKind};
use crate::coordinates::{meters_to_degrees, GeoPoint};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Max bound parameters per `IN (...)` query
const IN_CHUNK_SIZE: usize = 500;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    kind: StoreKind,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and ensure the schema exists
    pub fn open(db_path: impl AsRef<Path>, kind: StoreKind) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, kind)
    }

    pub fn open_in_memory(kind: StoreKind) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, kind)
    }

    fn from_connection(conn: Connection, kind: StoreKind) -> Result<Self, StoreError> {
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(&schema_sql(kind))?;

        log::info!("✅ SQLite {:?} store initialized", kind);

        Ok(Self {
            conn: Mutex::new(conn),
            kind,
        })
    }

    pub fn store_kind(&self) -> StoreKind {
        self.kind
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("sqlite connection lock poisoned".to_string()))
    }
}

fn schema_sql(kind: StoreKind) -> String {
    let owner = kind.detection_owner_key();
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            doc         TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_objects_aid ON objects(json_extract(doc, '$.aid'));
        CREATE INDEX IF NOT EXISTS idx_objects_oid ON objects(json_extract(doc, '$.oid'));
        CREATE INDEX IF NOT EXISTS idx_objects_lat
            ON objects(json_extract(doc, '$.loc.coordinates[1]'));

        CREATE TABLE IF NOT EXISTS detections (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            doc         TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_detections_key
            ON detections(json_extract(doc, '$.{owner}'), json_extract(doc, '$.candid'));
        CREATE INDEX IF NOT EXISTS idx_detections_aid ON detections(json_extract(doc, '$.aid'));

        CREATE TABLE IF NOT EXISTS non_detections (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            doc         TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_non_detections_aid
            ON non_detections(json_extract(doc, '$.aid'));
        "#
    )
}

/// `$.field` path for a plain field name
fn json_path(field: &str) -> Result<String, StoreError> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::UnsupportedFilter(format!("invalid field name '{}'", field)));
    }
    Ok(format!("$.{}", field))
}

fn to_sql_value(value: &Value) -> Result<SqlValue, StoreError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .ok_or_else(|| StoreError::UnsupportedFilter(format!("unrepresentable number {}", n))),
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(StoreError::UnsupportedFilter(format!(
            "cannot compare against {}",
            other
        ))),
    }
}

fn parse_doc(doc: &str) -> Result<Row, StoreError> {
    match serde_json::from_str::<Value>(doc)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Database("stored document is not a JSON object".to_string())),
    }
}

fn query_docs(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let docs = stmt.query_map(params_from_iter(params), |row| row.get::<_, String>(0))?;

    let mut rows = Vec::new();
    for doc in docs {
        rows.push(parse_doc(&doc?)?);
    }
    Ok(rows)
}

#[async_trait]
impl StorageBackend for SqliteStore {
    async fn find_all(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn()?;
        let table = kind.table_name();

        match filter {
            Filter::All => query_docs(
                &conn,
                &format!("SELECT doc FROM {} ORDER BY id", table),
                Vec::new(),
            ),
            Filter::In { field, values } => {
                let path = json_path(field)?;
                let mut rows = Vec::new();

                for chunk in values.chunks(IN_CHUNK_SIZE) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT doc FROM {} WHERE json_extract(doc, '{}') IN ({}) ORDER BY id",
                        table, path, placeholders
                    );
                    let params = chunk.iter().map(to_sql_value).collect::<Result<Vec<_>, _>>()?;
                    rows.extend(query_docs(&conn, &sql, params)?);
                }

                Ok(rows)
            }
        }
    }

    async fn bulk_insert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let verb = if kind == EntityKind::Detection { "INSERT OR IGNORE" } else { "INSERT" };

        let tx = conn.transaction()?;
        let mut ignored = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "{} INTO {} (doc, created_at, updated_at) VALUES (?1, ?2, ?2)",
                verb,
                kind.table_name()
            ))?;
            for row in &rows {
                if stmt.execute(params![serde_json::to_string(row)?, now])? == 0 {
                    ignored += 1;
                }
            }
        }
        tx.commit()?;

        if ignored > 0 {
            log::warn!(
                "⚠️  {} {} rows already stored, kept first version",
                ignored,
                kind.as_str()
            );
        }
        log::debug!("✅ Inserted {} {} rows", rows.len() - ignored, kind.as_str());
        Ok(())
    }

    async fn bulk_update(
        &self,
        kind: EntityKind,
        rows: Vec<Row>,
        filter_by: &str,
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let path = json_path(filter_by)?;
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {} SET doc = ?1, updated_at = ?2 WHERE json_extract(doc, '{}') = ?3",
                kind.table_name(),
                path
            ))?;
            for row in &rows {
                let key = row.get(filter_by).ok_or_else(|| {
                    StoreError::UnsupportedFilter(format!(
                        "update row has no '{}' field",
                        filter_by
                    ))
                })?;
                stmt.execute(params![serde_json::to_string(row)?, now, to_sql_value(key)?])?;
            }
        }
        tx.commit()?;

        log::debug!("✅ Updated {} {} rows", rows.len(), kind.as_str());
        Ok(())
    }

    async fn nearest(
        &self,
        point: GeoPoint,
        max_distance_meters: f64,
    ) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn()?;

        // Latitude band prefilter, exact distance cut in rank_by_distance
        let span = meters_to_degrees(max_distance_meters);
        let candidates = query_docs(
            &conn,
            "SELECT doc FROM objects
             WHERE json_extract(doc, '$.loc.coordinates[1]') BETWEEN ?1 AND ?2",
            vec![SqlValue::Real(point.lat - span), SqlValue::Real(point.lat + span)],
        )?;

        Ok(rank_by_distance(candidates, point, max_distance_meters))
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn object_row(aid: &str, oid: &str, ra: f64, dec: f64, ndet: i64) -> Row {
        row(json!({
            "aid": aid,
            "oid": oid,
            "ndet": ndet,
            "loc": {"type": "Point", "coordinates": [ra - 180.0, dec]},
        }))
    }

    #[tokio::test]
    async fn test_open_creates_schema_on_disk() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("alerts.db");

        let store = SqliteStore::open(&db_path, StoreKind::Document).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.backend_type(), "SQLite");

        // Reopening is idempotent
        drop(store);
        let store = SqliteStore::open(&db_path, StoreKind::Document).unwrap();
        assert_eq!(store.store_kind(), StoreKind::Document);
    }

    #[tokio::test]
    async fn test_find_by_membership_across_types() {
        let store = SqliteStore::open_in_memory(StoreKind::Document).unwrap();
        store
            .bulk_insert(
                EntityKind::Object,
                vec![
                    object_row("A1", "ZTF1", 10.0, 10.0, 1),
                    object_row("A2", "ZTF2", 20.0, 20.0, 1),
                    object_row("A3", "ZTF3", 30.0, 30.0, 1),
                ],
            )
            .await
            .unwrap();

        let found = store
            .find_all(EntityKind::Object, &Filter::field_in("aid", ["A1", "A3", "missing"]))
            .await
            .unwrap();
        let aids: Vec<_> = found.iter().map(|r| r["aid"].as_str().unwrap()).collect();
        assert_eq!(aids, vec!["A1", "A3"]);

        let by_ndet = store
            .find_all(EntityKind::Object, &Filter::field_in("ndet", [1]))
            .await
            .unwrap();
        assert_eq!(by_ndet.len(), 3);

        let empty = store
            .find_all(EntityKind::Object, &Filter::field_in::<_, Value>("aid", []))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_field_name_rejected() {
        let store = SqliteStore::open_in_memory(StoreKind::Document).unwrap();
        let result = store
            .find_all(EntityKind::Object, &Filter::field_in("aid') OR 1=1 --", ["x"]))
            .await;
        assert!(matches!(result, Err(StoreError::UnsupportedFilter(_))));
    }

    #[tokio::test]
    async fn test_duplicate_detection_keeps_first_write() {
        let store = SqliteStore::open_in_memory(StoreKind::Document).unwrap();
        store
            .bulk_insert(
                EntityKind::Detection,
                vec![row(json!({"aid": "A1", "candid": 7, "mag": 18.0}))],
            )
            .await
            .unwrap();
        store
            .bulk_insert(
                EntityKind::Detection,
                vec![row(json!({"aid": "A1", "candid": 7, "mag": 19.0}))],
            )
            .await
            .unwrap();

        let found = store.find_all(EntityKind::Detection, &Filter::All).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["mag"], json!(18.0));
    }

    #[tokio::test]
    async fn test_relational_store_keys_detections_by_oid() {
        let store = SqliteStore::open_in_memory(StoreKind::Relational).unwrap();
        // Same candid under two survey objects is two rows in the relational mirror
        store
            .bulk_insert(
                EntityKind::Detection,
                vec![
                    row(json!({"aid": "A1", "oid": "ZTF1", "candid": 7})),
                    row(json!({"aid": "A1", "oid": "ATLAS1", "candid": 7})),
                ],
            )
            .await
            .unwrap();

        let found = store.find_all(EntityKind::Detection, &Filter::All).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_update_replaces_document() {
        let store = SqliteStore::open_in_memory(StoreKind::Document).unwrap();
        store
            .bulk_insert(EntityKind::Object, vec![object_row("A1", "ZTF1", 10.0, 10.0, 1)])
            .await
            .unwrap();
        store
            .bulk_update(EntityKind::Object, vec![object_row("A1", "ZTF1", 10.0, 10.0, 5)], "aid")
            .await
            .unwrap();

        let found = store.find_all(EntityKind::Object, &Filter::All).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["ndet"], json!(5));
    }

    #[tokio::test]
    async fn test_nearest_uses_band_and_exact_distance() {
        let store = SqliteStore::open_in_memory(StoreKind::Document).unwrap();
        store
            .bulk_insert(
                EntityKind::Object,
                vec![
                    object_row("close", "Z1", 150.0 + 0.5 / 3600.0, -30.0, 1),
                    object_row("closest", "Z2", 150.0, -30.0 + 0.1 / 3600.0, 1),
                    object_row("same_band_far_ra", "Z3", 155.0, -30.0, 1),
                    object_row("other_band", "Z4", 150.0, 10.0, 1),
                ],
            )
            .await
            .unwrap();

        let hits = store.nearest(GeoPoint::from_radec(150.0, -30.0), 50.0).await.unwrap();
        let aids: Vec<_> = hits.iter().map(|r| r["aid"].as_str().unwrap()).collect();
        assert_eq!(aids, vec!["closest", "close"]);
    }
}
