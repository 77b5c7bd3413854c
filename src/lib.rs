//! alertflow - multi-survey alert ingestion
//!
//! Resolves survey alerts to survey-independent identities, reconciles their
//! light curves against stored history, and writes/produces the result.

pub mod aggregator;
pub mod config;
pub mod coordinates;
pub mod correction;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ingestion;
pub mod persistence;
pub mod producer;
pub mod prv_candidates;
pub mod reconciler;
pub mod sqlite_pragma;
pub mod storage;
pub mod survey;
pub mod types;

pub use engine::{BatchReport, IngestionEngine};
pub use error::IngestError;
