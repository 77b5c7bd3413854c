//! Per-identity object aggregates
//!
//! Objects are always recomputed from the full reconciled history, so the
//! stored and the new detections of an identity contribute alike.

use crate::coordinates::{compute_mean_dec, compute_mean_ra, GeoPoint};
use crate::error::IngestError;
use crate::reconciler::LightCurves;
use crate::storage::{EntityKind, Filter, StorageBackend};
use crate::types::{Detection, ObjectRecord};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Aggregate one identity's detections into its object row
///
/// The earliest detection provides `tid` and `oid`.
pub fn aggregate(aid: &str, detections: &[&Detection]) -> Result<ObjectRecord, IngestError> {
    let first = detections
        .iter()
        .copied()
        .reduce(|earliest, d| if d.mjd < earliest.mjd { d } else { earliest })
        .ok_or_else(|| IngestError::schema(format!("no detections for {}", aid)))?;

    let ras: Vec<f64> = detections.iter().map(|d| d.ra).collect();
    let e_ras: Vec<f64> = detections.iter().map(|d| d.e_ra).collect();
    let decs: Vec<f64> = detections.iter().map(|d| d.dec).collect();
    let e_decs: Vec<f64> = detections.iter().map(|d| d.e_dec).collect();

    let (meanra, e_ra) = compute_mean_ra(&ras, &e_ras)?;
    let (meandec, e_dec) = compute_mean_dec(&decs, &e_decs)?;

    let firstmjd = detections.iter().map(|d| d.mjd).fold(f64::INFINITY, f64::min);
    let lastmjd = detections.iter().map(|d| d.mjd).fold(f64::NEG_INFINITY, f64::max);

    Ok(ObjectRecord {
        aid: aid.to_string(),
        tid: first.tid.clone(),
        oid: first.oid.clone(),
        lastmjd,
        firstmjd,
        meanra,
        meandec,
        e_ra,
        e_dec,
        ndet: detections.len() as i64,
        loc: GeoPoint::from_radec(meanra, meandec),
        new: false,
    })
}

pub struct ObjectAggregator {
    store: Arc<dyn StorageBackend>,
}

impl ObjectAggregator {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    /// One object per identity in the light curves, in first-appearance order,
    /// flagged `new` when the identity has no stored object yet
    pub async fn preprocess_objects(
        &self,
        light_curves: &LightCurves,
    ) -> Result<Vec<ObjectRecord>, IngestError> {
        let mut groups: Vec<(&str, Vec<&Detection>)> = Vec::new();
        for detection in &light_curves.detections {
            match groups.iter_mut().find(|(aid, _)| *aid == detection.aid) {
                Some((_, group)) => group.push(detection),
                None => groups.push((detection.aid.as_str(), vec![detection])),
            }
        }

        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self
            .store
            .find_all(
                EntityKind::Object,
                &Filter::field_in("aid", groups.iter().map(|(aid, _)| aid.to_string())),
            )
            .await?;
        let known: HashSet<String> = stored
            .iter()
            .filter_map(|row| row.get("aid").and_then(Value::as_str).map(str::to_string))
            .collect();

        let objects = groups
            .into_iter()
            .map(|(aid, group)| {
                let mut object = aggregate(aid, &group)?;
                object.new = !known.contains(aid);
                Ok(object)
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        log::info!(
            "🪐 Aggregated {} objects ({} new)",
            objects.len(),
            objects.iter().filter(|o| o.new).count()
        );
        Ok(objects)
    }
}
