//! Ingestion Runtime
//!
//! Reads alerts as JSON lines, batches them, and runs every batch through the
//! ingestion engine against SQLite stores.
//!
//! Usage:
//!   ingestion_runtime [alerts.jsonl]     (stdin when no file is given)
//!
//! Environment variables:
//!   ALERTFLOW_DB_PATH - document store path (default: alertflow.db)
//!   ALERTFLOW_RELATIONAL_DB_PATH - optional relational mirror
//!   PRODUCER_OUTPUT_PATH - optional JSONL light-curve output
//!   ALERT_BATCH_SIZE - alerts per batch (default: 500)
//!   RUST_LOG - log filter (default: info)

use alertflow::config::IngestionConfig;
use alertflow::engine::IngestionEngine;
use alertflow::ingestion::start_alert_ingestion;
use alertflow::producer::JsonlProducer;
use alertflow::storage::{SqliteStore, StoreKind};
use alertflow::types::Alert;
use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 alertflow ingestion runtime");

    let config = IngestionConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!(
        "   ├─ Relational mirror: {}",
        config.relational_db_path.as_deref().unwrap_or("disabled")
    );
    info!(
        "   ├─ Producer output: {}",
        config.producer_output_path.as_deref().unwrap_or("disabled")
    );
    info!("   ├─ Cone search radius: {}\"", config.cone_search_radius_arcsec);
    info!("   ├─ Fallback surveys: {:?}", config.fallback_surveys);
    info!("   └─ Batch size: {} alerts", config.batch_size);

    // Open stores (schema created idempotently)
    let document = Arc::new(SqliteStore::open(&config.db_path, StoreKind::Document)?);
    let mut engine = IngestionEngine::new(&config, document);

    if let Some(path) = &config.relational_db_path {
        engine = engine.with_relational(Arc::new(SqliteStore::open(path, StoreKind::Relational)?));
    }
    if let Some(path) = &config.producer_output_path {
        engine = engine.with_producer(Box::new(JsonlProducer::new(path)?));
    }
    info!("✅ IngestionEngine created");

    let (tx, rx) = mpsc::channel::<Vec<Alert>>(config.channel_buffer);
    let ingestion = tokio::spawn(start_alert_ingestion(rx, engine));

    let sent = match env::args().nth(1) {
        Some(path) => {
            info!("📂 Reading alerts from {}", path);
            let file = tokio::fs::File::open(&path).await?;
            feed_batches(BufReader::new(file), &tx, config.batch_size).await?
        }
        None => {
            info!("📂 Reading alerts from stdin");
            feed_batches(BufReader::new(tokio::io::stdin()), &tx, config.batch_size).await?
        }
    };

    // Close channel so the loop drains and stops
    drop(tx);
    let stats = ingestion.await?;

    info!("✅ Runtime stopped: {} alerts read, {} ingested", sent, stats.alerts);
    if stats.batches_failed > 0 {
        warn!("⚠️  {} batches failed", stats.batches_failed);
    }
    Ok(())
}

/// Parse JSON lines into batches of `batch_size`; returns alerts sent
async fn feed_batches<R>(
    reader: R,
    tx: &mpsc::Sender<Vec<Alert>>,
    batch_size: usize,
) -> Result<usize, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut sent = 0usize;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match Alert::from_jsonl(&line) {
            Ok(alert) => batch.push(alert),
            Err(e) => {
                warn!("⚠️  Skipping line {}: {}", line_no, e);
                continue;
            }
        }

        if batch.len() >= batch_size {
            sent += batch.len();
            if tx.send(std::mem::take(&mut batch)).await.is_err() {
                error!("❌ Ingestion loop stopped early");
                return Ok(sent);
            }
        }
    }

    if !batch.is_empty() {
        sent += batch.len();
        if tx.send(batch).await.is_err() {
            error!("❌ Ingestion loop stopped early");
        }
    }

    Ok(sent)
}
