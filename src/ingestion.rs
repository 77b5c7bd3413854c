//! Alert ingestion - async channel processor for alert batches

use crate::engine::IngestionEngine;
use crate::types::Alert;
use tokio::sync::mpsc;

/// Totals over the lifetime of an ingestion loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub batches_ok: u64,
    pub batches_failed: u64,
    pub alerts: u64,
}

/// Process batches from `rx` one at a time until the channel closes
///
/// A failed batch is logged and skipped; retrying is left to whoever feeds
/// the channel.
pub async fn start_alert_ingestion(
    mut rx: mpsc::Receiver<Vec<Alert>>,
    mut engine: IngestionEngine,
) -> IngestionStats {
    log::info!("🚀 Starting alert ingestion");
    log::info!("   └─ Waiting for batches...");

    let mut stats = IngestionStats::default();

    while let Some(batch) = rx.recv().await {
        let size = batch.len();
        let started = std::time::Instant::now();

        match engine.process_batch(batch).await {
            Ok(report) => {
                stats.batches_ok += 1;
                stats.alerts += size as u64;
                log::info!(
                    "📊 Batch complete: {} alerts, {} identities | objects +{} ~{} | detections +{} | non-detections +{} | produced {} | {}ms",
                    report.alerts,
                    report.identities,
                    report.objects_inserted,
                    report.objects_updated,
                    report.detections_inserted,
                    report.non_detections_inserted,
                    report.messages_produced,
                    started.elapsed().as_millis()
                );
                if let Ok(json) = serde_json::to_string(&report) {
                    log::debug!("📋 {}", json);
                }
            }
            Err(e) => {
                stats.batches_failed += 1;
                log::error!("❌ Batch of {} alerts failed: {}", size, e);
            }
        }

        if rx.len() > rx.max_capacity() / 2 {
            log::warn!("⚠️  Channel usage high: {}/{}", rx.len(), rx.max_capacity());
        }
    }

    log::info!(
        "✅ Ingestion stopped: {} batches ok, {} failed, {} alerts",
        stats.batches_ok,
        stats.batches_failed,
        stats.alerts
    );
    stats
}
