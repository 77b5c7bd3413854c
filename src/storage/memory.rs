//! In-process storage backend
//!
//! Holds every entity as a list of JSON rows. Useful as the document store in
//! tests and single-process replays; the spatial index is a linear scan.

use super::{rank_by_distance, EntityKind, Filter, Row, StorageBackend, StoreError};
use crate::coordinates::GeoPoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<EntityKind, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, HashMap<EntityKind, Vec<Row>>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }

    /// Number of stored rows of `kind`
    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.tables()
            .map(|tables| tables.get(&kind).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn find_all(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .get(&kind)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default())
    }

    async fn bulk_insert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.entry(kind).or_default().extend(rows);
        Ok(())
    }

    async fn bulk_update(
        &self,
        kind: EntityKind,
        rows: Vec<Row>,
        filter_by: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let stored = tables.entry(kind).or_default();

        for row in rows {
            let key = row.get(filter_by).cloned().ok_or_else(|| {
                StoreError::UnsupportedFilter(format!("update row has no '{}' field", filter_by))
            })?;
            for existing in stored.iter_mut().filter(|r| r.get(filter_by) == Some(&key)) {
                *existing = row.clone();
            }
        }

        Ok(())
    }

    async fn nearest(
        &self,
        point: GeoPoint,
        max_distance_meters: f64,
    ) -> Result<Vec<Row>, StoreError> {
        let objects = self.find_all(EntityKind::Object, &Filter::All).await?;
        Ok(rank_by_distance(objects, point, max_distance_meters))
    }

    fn backend_type(&self) -> &'static str {
        "Memory"
    }
}
