//! Ingestion configuration from environment variables

use crate::identity::DEFAULT_CONE_RADIUS_ARCSEC;
use std::env;

/// Configuration for the ingestion runtime
///
/// Loaded from environment variables with sensible defaults. Connection
/// details live here only; the core receives already-opened stores.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    /// Path to the document store SQLite file
    pub db_path: String,

    /// Optional relational mirror SQLite file
    pub relational_db_path: Option<String>,

    /// Cross-match radius in arcseconds
    pub cone_search_radius_arcsec: f64,

    /// Stamped on every newly stored detection
    pub step_version: String,

    /// Survey tags handled by the passthrough variant
    pub fallback_surveys: Vec<String>,

    /// JSONL light-curve output; production is disabled when unset
    pub producer_output_path: Option<String>,

    /// Alerts per batch
    pub batch_size: usize,

    /// Batches buffered between reader and ingestion loop
    pub channel_buffer: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            db_path: "alertflow.db".to_string(),
            relational_db_path: None,
            cone_search_radius_arcsec: DEFAULT_CONE_RADIUS_ARCSEC,
            step_version: format!("alertflow-{}", env!("CARGO_PKG_VERSION")),
            fallback_surveys: Vec::new(),
            producer_output_path: None,
            batch_size: 500,
            channel_buffer: 16,
        }
    }
}

impl IngestionConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ALERTFLOW_DB_PATH` (default: alertflow.db)
    /// - `ALERTFLOW_RELATIONAL_DB_PATH` (default: unset)
    /// - `CONE_SEARCH_RADIUS_ARCSEC` (default: 1.4)
    /// - `STEP_VERSION` (default: alertflow-<crate version>)
    /// - `FALLBACK_SURVEYS` (comma separated, default: empty)
    /// - `PRODUCER_OUTPUT_PATH` (default: unset)
    /// - `ALERT_BATCH_SIZE` (default: 500)
    /// - `ALERT_CHANNEL_BUFFER` (default: 16)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("ALERTFLOW_DB_PATH").unwrap_or(defaults.db_path),

            relational_db_path: non_empty_var("ALERTFLOW_RELATIONAL_DB_PATH"),

            cone_search_radius_arcsec: env::var("CONE_SEARCH_RADIUS_ARCSEC")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|r| r.is_finite() && *r > 0.0)
                .unwrap_or(defaults.cone_search_radius_arcsec),

            step_version: env::var("STEP_VERSION").unwrap_or(defaults.step_version),

            fallback_surveys: env::var("FALLBACK_SURVEYS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            producer_output_path: non_empty_var("PRODUCER_OUTPUT_PATH"),

            batch_size: env::var("ALERT_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),

            channel_buffer: env::var("ALERT_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.channel_buffer),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}
