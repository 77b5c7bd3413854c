//! Storage collaborator interface
//!
//! Both backing stores (the document store that owns the identity spatial
//! index, and the optional relational mirror) are driven through the same
//! [`StorageBackend`] trait. Rows are plain JSON objects; the core converts them
//! to typed records and raises a schema error when a canonical field is missing.

pub mod memory;
pub mod sqlite;

use crate::coordinates::{sphere_distance_meters, GeoPoint};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One stored record
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Object,
    Detection,
    NonDetection,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Object => "object",
            EntityKind::Detection => "detection",
            EntityKind::NonDetection => "non_detection",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Object => "objects",
            EntityKind::Detection => "detections",
            EntityKind::NonDetection => "non_detections",
        }
    }
}

/// Which of the two injected stores a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Keyed by identity; owns the spatial index
    Document,
    /// Objects keyed by identity, detections by survey-native object id
    Relational,
}

impl StoreKind {
    /// Field paired with `candid` to identify a detection
    pub fn detection_owner_key(&self) -> &'static str {
        match self {
            StoreKind::Document => "aid",
            StoreKind::Relational => "oid",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// `field ∈ values`
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn field_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::In { field, values } => row
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Serialization(serde_json::Error),
    UnsupportedFilter(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::UnsupportedFilter(e) => write!(f, "Unsupported filter: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Capability surface every store exposes to the ingestion core
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// All rows of `kind` matching `filter`
    async fn find_all(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn bulk_insert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Replace, wholesale, every stored row whose `filter_by` field equals the
    /// same field of a new row
    async fn bulk_update(
        &self,
        kind: EntityKind,
        rows: Vec<Row>,
        filter_by: &str,
    ) -> Result<(), StoreError>;

    /// Object rows whose `loc` lies within `max_distance_meters` of `point`,
    /// closest first
    async fn nearest(
        &self,
        point: GeoPoint,
        max_distance_meters: f64,
    ) -> Result<Vec<Row>, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Location of an object row, if it carries a GeoJSON point
pub(crate) fn row_location(row: &Row) -> Option<GeoPoint> {
    row.get("loc")
        .and_then(|loc| serde_json::from_value::<GeoPoint>(loc.clone()).ok())
}

/// Keep rows within range of `point`, sorted by ascending distance
pub(crate) fn rank_by_distance(
    rows: Vec<Row>,
    point: GeoPoint,
    max_distance_meters: f64,
) -> Vec<Row> {
    let mut ranked: Vec<(f64, Row)> = rows
        .into_iter()
        .filter_map(|row| {
            let distance = sphere_distance_meters(point, row_location(&row)?);
            (distance <= max_distance_meters).then_some((distance, row))
        })
        .collect();

    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked.into_iter().map(|(_, row)| row).collect()
}
