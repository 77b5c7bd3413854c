//! Merge of incoming records against stored light curves
//!
//! Stored rows always win: an incoming detection whose `(aid, candid)` is
//! already stored is dropped, and an incoming non-detection is dropped when a
//! stored one shares `(aid, fid, mjd)` with mjd rounded to 5 decimals.

use crate::error::IngestError;
use crate::storage::{EntityKind, Filter, StorageBackend};
use crate::types::{from_row, Detection, NonDetection};
use std::collections::HashSet;
use std::sync::Arc;

/// Full history (stored + new) of every identity touched by a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightCurves {
    pub detections: Vec<Detection>,
    pub non_detections: Vec<NonDetection>,
}

impl LightCurves {
    pub fn new_detections(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|d| d.new)
    }

    pub fn new_non_detections(&self) -> impl Iterator<Item = &NonDetection> {
        self.non_detections.iter().filter(|n| n.new)
    }
}

/// `round(mjd, 5)` as an exact integer key
pub fn mjd_key(mjd: f64) -> i64 {
    (mjd * 1e5).round() as i64
}

fn non_detection_key(non_detection: &NonDetection) -> (String, i64, i64) {
    (
        non_detection.aid.clone(),
        non_detection.fid,
        mjd_key(non_detection.mjd),
    )
}

pub struct LightCurveReconciler {
    store: Arc<dyn StorageBackend>,
}

impl LightCurveReconciler {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        detections: Vec<Detection>,
        non_detections: Vec<NonDetection>,
    ) -> Result<LightCurves, IngestError> {
        let mut aids: Vec<String> = Vec::new();
        for aid in detections
            .iter()
            .map(|d| &d.aid)
            .chain(non_detections.iter().map(|n| &n.aid))
        {
            if !aids.contains(aid) {
                aids.push(aid.clone());
            }
        }

        if aids.is_empty() {
            return Ok(LightCurves::default());
        }

        let stored_detections = self.stored_detections(&aids).await?;
        let mut seen: HashSet<(String, i64)> = stored_detections
            .iter()
            .map(|d| (d.aid.clone(), d.candid))
            .collect();

        let incoming = detections.len();
        let mut merged = stored_detections;
        let stored_count = merged.len();
        for mut detection in detections {
            if seen.insert((detection.aid.clone(), detection.candid)) {
                detection.new = true;
                merged.push(detection);
            }
        }
        log::info!(
            "🔁 Detections: {} stored, {} new, {} duplicates dropped",
            stored_count,
            merged.len() - stored_count,
            incoming - (merged.len() - stored_count)
        );

        let non_detections = if non_detections.is_empty() {
            Vec::new()
        } else {
            self.merge_non_detections(&aids, non_detections).await?
        };

        Ok(LightCurves {
            detections: merged,
            non_detections,
        })
    }

    async fn stored_detections(&self, aids: &[String]) -> Result<Vec<Detection>, IngestError> {
        let rows = self
            .store
            .find_all(EntityKind::Detection, &Filter::field_in("aid", aids.iter().cloned()))
            .await?;

        rows.into_iter()
            .map(|row| {
                let mut detection: Detection = from_row(EntityKind::Detection.as_str(), row)?;
                detection.new = false;
                Ok(detection)
            })
            .collect()
    }

    async fn merge_non_detections(
        &self,
        aids: &[String],
        incoming: Vec<NonDetection>,
    ) -> Result<Vec<NonDetection>, IngestError> {
        let rows = self
            .store
            .find_all(EntityKind::NonDetection, &Filter::field_in("aid", aids.iter().cloned()))
            .await?;

        let mut merged = rows
            .into_iter()
            .map(|row| {
                let mut non_detection: NonDetection =
                    from_row(EntityKind::NonDetection.as_str(), row)?;
                non_detection.new = false;
                Ok(non_detection)
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let mut seen: HashSet<(String, i64, i64)> = merged.iter().map(non_detection_key).collect();
        let stored_count = merged.len();
        for mut non_detection in incoming {
            if seen.insert(non_detection_key(&non_detection)) {
                non_detection.new = true;
                merged.push(non_detection);
            }
        }

        log::info!(
            "🔁 Non-detections: {} stored, {} new",
            stored_count,
            merged.len() - stored_count
        );
        Ok(merged)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::coordinates::GeoPoint;
    use crate::storage::{EntityKind, Filter, MemoryStore, Row, StorageBackend, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store that counts reads per entity
    #[derive(Default)]
    pub struct CountingStore {
        pub inner: MemoryStore,
        pub detection_reads: AtomicUsize,
        pub non_detection_reads: AtomicUsize,
        pub writes: AtomicUsize,
    }

    impl CountingStore {
        pub fn reads_of(&self, kind: EntityKind) -> usize {
            match kind {
                EntityKind::Detection => self.detection_reads.load(Ordering::SeqCst),
                EntityKind::NonDetection => self.non_detection_reads.load(Ordering::SeqCst),
                EntityKind::Object => 0,
            }
        }
    }

    #[async_trait]
    impl StorageBackend for CountingStore {
        async fn find_all(
            &self,
            kind: EntityKind,
            filter: &Filter,
        ) -> Result<Vec<Row>, StoreError> {
            match kind {
                EntityKind::Detection => self.detection_reads.fetch_add(1, Ordering::SeqCst),
                EntityKind::NonDetection => self.non_detection_reads.fetch_add(1, Ordering::SeqCst),
                EntityKind::Object => 0,
            };
            self.inner.find_all(kind, filter).await
        }

        async fn bulk_insert(&self, kind: EntityKind, rows: Vec<Row>) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.bulk_insert(kind, rows).await
        }

        async fn bulk_update(
            &self,
            kind: EntityKind,
            rows: Vec<Row>,
            filter_by: &str,
        ) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.bulk_update(kind, rows, filter_by).await
        }

        async fn nearest(
            &self,
            point: GeoPoint,
            max_distance_meters: f64,
        ) -> Result<Vec<Row>, StoreError> {
            self.inner.nearest(point, max_distance_meters).await
        }

        fn backend_type(&self) -> &'static str {
            "Counting"
        }
    }
}
