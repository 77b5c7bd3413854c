//! Per-batch control flow
//!
//! identities → embedded history → candid dedup → correction → reconciliation
//! → aggregation → writes → production. Every in-memory stage completes before
//! the first write, so a failing batch leaves storage untouched.

use crate::aggregator::ObjectAggregator;
use crate::config::IngestionConfig;
use crate::correction::correct_batch;
use crate::error::IngestError;
use crate::identity::IdentityResolver;
use crate::persistence::PersistenceCoordinator;
use crate::producer::LightCurveProducer;
use crate::prv_candidates::extract_batch;
use crate::reconciler::LightCurveReconciler;
use crate::storage::StorageBackend;
use crate::survey::SurveyDispatch;
use crate::types::{Alert, Detection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one processed batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed_at: DateTime<Utc>,
    pub alerts: usize,
    pub identities: usize,
    pub objects_inserted: usize,
    pub objects_updated: usize,
    pub detections_inserted: usize,
    pub non_detections_inserted: usize,
    pub messages_produced: usize,
}

impl BatchReport {
    fn empty() -> Self {
        Self {
            processed_at: Utc::now(),
            alerts: 0,
            identities: 0,
            objects_inserted: 0,
            objects_updated: 0,
            detections_inserted: 0,
            non_detections_inserted: 0,
            messages_produced: 0,
        }
    }
}

pub struct IngestionEngine {
    dispatch: SurveyDispatch,
    resolver: IdentityResolver,
    reconciler: LightCurveReconciler,
    aggregator: ObjectAggregator,
    persistence: PersistenceCoordinator,
}

impl IngestionEngine {
    /// Engine over an already-opened document store
    pub fn new(config: &IngestionConfig, document: Arc<dyn StorageBackend>) -> Self {
        Self {
            dispatch: SurveyDispatch::new(config.fallback_surveys.iter().cloned()),
            resolver: IdentityResolver::new(document.clone(), config.cone_search_radius_arcsec),
            reconciler: LightCurveReconciler::new(document.clone()),
            aggregator: ObjectAggregator::new(document.clone()),
            persistence: PersistenceCoordinator::new(document, config.step_version.clone()),
        }
    }

    pub fn with_relational(mut self, relational: Arc<dyn StorageBackend>) -> Self {
        self.persistence = self.persistence.with_relational(relational);
        self
    }

    pub fn with_producer(mut self, producer: Box<dyn LightCurveProducer>) -> Self {
        self.persistence = self.persistence.with_producer(producer);
        self
    }

    pub async fn process_batch(&mut self, alerts: Vec<Alert>) -> Result<BatchReport, IngestError> {
        if alerts.is_empty() {
            return Ok(BatchReport::empty());
        }
        let alert_count = alerts.len();

        // Reject unsupported surveys before touching storage
        {
            let mut tags = HashSet::new();
            for alert in &alerts {
                if tags.insert(alert.tid.as_str()) {
                    self.dispatch.dispatch(&alert.tid)?;
                }
            }
        }

        let resolved = self.resolver.resolve_batch(alerts).await?;

        let mut detections: Vec<Detection> = resolved
            .iter()
            .map(|(aid, alert)| Detection::from_alert(aid, alert))
            .collect();
        let (prv_detections, prv_non_detections) = extract_batch(&self.dispatch, &mut detections)?;
        log::info!(
            "📜 Extracted {} previous detections and {} non-detections",
            prv_detections.len(),
            prv_non_detections.len()
        );

        // Live alerts first, so they win over reconstructed history
        let mut seen_candids = HashSet::new();
        let detections: Vec<Detection> = detections
            .into_iter()
            .chain(prv_detections)
            .filter(|d| seen_candids.insert(d.candid))
            .collect();

        let corrected = correct_batch(&self.dispatch, detections)?;
        let mut light_curves = self.reconciler.reconcile(corrected, prv_non_detections).await?;
        let objects = self.aggregator.preprocess_objects(&light_curves).await?;

        let written = self.persistence.persist(&objects, &mut light_curves).await?;
        let produced = self.persistence.produce(&resolved, &objects, &light_curves).await?;

        let identities = resolved.iter().map(|(aid, _)| aid.as_str()).collect::<HashSet<_>>().len();

        Ok(BatchReport {
            processed_at: Utc::now(),
            alerts: alert_count,
            identities,
            objects_inserted: written.objects_inserted,
            objects_updated: written.objects_updated,
            detections_inserted: written.detections_inserted,
            non_detections_inserted: written.non_detections_inserted,
            messages_produced: produced,
        })
    }
}
