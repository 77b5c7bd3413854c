//! Writes of a reconciled batch and light-curve production
//!
//! The document store is always written; the relational mirror, when
//! configured, receives the same objects and new records. Objects are keyed
//! by `aid` in both stores. Only rows flagged `new` are inserted, so replays
//! never duplicate.

use crate::error::IngestError;
use crate::producer::LightCurveProducer;
use crate::reconciler::LightCurves;
use crate::storage::{EntityKind, Filter, StorageBackend, StoreKind};
use crate::types::{to_row, Alert, LightCurveMessage, ObjectRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rows written to one store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub objects_inserted: usize,
    pub objects_updated: usize,
    pub detections_inserted: usize,
    pub non_detections_inserted: usize,
}

pub struct PersistenceCoordinator {
    document: Arc<dyn StorageBackend>,
    relational: Option<Arc<dyn StorageBackend>>,
    producer: Option<Box<dyn LightCurveProducer>>,
    step_version: String,
}

impl PersistenceCoordinator {
    pub fn new(document: Arc<dyn StorageBackend>, step_version: impl Into<String>) -> Self {
        Self {
            document,
            relational: None,
            producer: None,
            step_version: step_version.into(),
        }
    }

    pub fn with_relational(mut self, relational: Arc<dyn StorageBackend>) -> Self {
        self.relational = Some(relational);
        self
    }

    pub fn with_producer(mut self, producer: Box<dyn LightCurveProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    fn store(&self, kind: StoreKind) -> Option<&Arc<dyn StorageBackend>> {
        match kind {
            StoreKind::Document => Some(&self.document),
            StoreKind::Relational => self.relational.as_ref(),
        }
    }

    /// Stamp new detections with the step version and write to every
    /// configured store; returns the document store summary
    pub async fn persist(
        &self,
        objects: &[ObjectRecord],
        light_curves: &mut LightCurves,
    ) -> Result<WriteSummary, IngestError> {
        for detection in light_curves.detections.iter_mut().filter(|d| d.new) {
            detection.step_id_corr = Some(self.step_version.clone());
        }

        let summary = self.write(StoreKind::Document, objects, light_curves).await?;
        if self.relational.is_some() {
            let mirrored = self.write(StoreKind::Relational, objects, light_curves).await?;
            log::debug!("🪞 Relational mirror: {:?}", mirrored);
        }

        Ok(summary)
    }

    /// Write objects and new records to the store selected by `kind`
    pub async fn write(
        &self,
        kind: StoreKind,
        objects: &[ObjectRecord],
        light_curves: &LightCurves,
    ) -> Result<WriteSummary, IngestError> {
        let store = match self.store(kind) {
            Some(store) => store,
            None => return Ok(WriteSummary::default()),
        };

        // One row per identity, first occurrence kept
        let mut seen = HashSet::new();
        let objects: Vec<&ObjectRecord> =
            objects.iter().filter(|o| seen.insert(o.aid.as_str())).collect();

        // `new` reflects the document store; the mirror may lag behind it
        let mirrored = match kind {
            StoreKind::Document => None,
            StoreKind::Relational => Some(stored_aids(store.as_ref(), &objects).await?),
        };

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for object in objects {
            let is_new = match &mirrored {
                Some(stored) => !stored.contains(object.aid.as_str()),
                None => object.new,
            };
            if is_new {
                inserts.push(to_row(object)?);
            } else {
                updates.push(to_row(object)?);
            }
        }

        let detections = light_curves
            .new_detections()
            .map(to_row)
            .collect::<Result<Vec<_>, _>>()?;
        let non_detections = light_curves
            .new_non_detections()
            .map(to_row)
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "💾 [{}] Inserting {} and updating {} objects",
            store.backend_type(),
            inserts.len(),
            updates.len()
        );

        let summary = WriteSummary {
            objects_inserted: inserts.len(),
            objects_updated: updates.len(),
            detections_inserted: detections.len(),
            non_detections_inserted: non_detections.len(),
        };

        if !inserts.is_empty() {
            store.bulk_insert(EntityKind::Object, inserts).await?;
        }
        if !updates.is_empty() {
            store.bulk_update(EntityKind::Object, updates, "aid").await?;
        }

        log::info!(
            "💾 [{}] Inserting {} detections and {} non-detections",
            store.backend_type(),
            summary.detections_inserted,
            summary.non_detections_inserted
        );
        if !detections.is_empty() {
            store.bulk_insert(EntityKind::Detection, detections).await?;
        }
        if !non_detections.is_empty() {
            store.bulk_insert(EntityKind::NonDetection, non_detections).await?;
        }

        Ok(summary)
    }

    /// One message per identity in `alerts`, keyed by aid
    ///
    /// `oid` and `candid` come from the identity's last alert in batch order.
    pub async fn produce(
        &mut self,
        alerts: &[(String, Alert)],
        objects: &[ObjectRecord],
        light_curves: &LightCurves,
    ) -> Result<usize, IngestError> {
        let messages = build_messages(alerts, objects, light_curves)?;

        let producer = match self.producer.as_mut() {
            Some(producer) => producer,
            None => return Ok(0),
        };

        for message in &messages {
            producer.produce(&message.aid, message).await?;
        }
        producer.flush().await?;

        log::info!("📤 Produced {} light curves via {}", messages.len(), producer.backend_type());
        Ok(messages.len())
    }
}

/// Identities among `objects` that already have an object row in `store`
async fn stored_aids(
    store: &dyn StorageBackend,
    objects: &[&ObjectRecord],
) -> Result<HashSet<String>, IngestError> {
    if objects.is_empty() {
        return Ok(HashSet::new());
    }
    let filter = Filter::field_in("aid", objects.iter().map(|o| o.aid.clone()));
    let rows = store.find_all(EntityKind::Object, &filter).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("aid").and_then(|aid| aid.as_str()).map(str::to_string))
        .collect())
}

pub fn build_messages(
    alerts: &[(String, Alert)],
    objects: &[ObjectRecord],
    light_curves: &LightCurves,
) -> Result<Vec<LightCurveMessage>, IngestError> {
    let mut order: Vec<&str> = Vec::new();
    let mut last_alert: HashMap<&str, &Alert> = HashMap::new();
    for (aid, alert) in alerts {
        if last_alert.insert(aid.as_str(), alert).is_none() {
            order.push(aid.as_str());
        }
    }

    let objects: HashMap<&str, &ObjectRecord> =
        objects.iter().map(|o| (o.aid.as_str(), o)).collect();

    order
        .into_iter()
        .map(|aid| {
            let alert = last_alert[aid];
            let object = objects
                .get(aid)
                .ok_or_else(|| IngestError::schema(format!("no object aggregated for {}", aid)))?;

            Ok(LightCurveMessage {
                aid: aid.to_string(),
                oid: alert.oid.clone(),
                candid: alert.candid,
                detections: light_curves
                    .detections
                    .iter()
                    .filter(|d| d.aid == aid)
                    .cloned()
                    .collect(),
                non_detections: light_curves
                    .non_detections
                    .iter()
                    .filter(|n| n.aid == aid)
                    .cloned()
                    .collect(),
                meanra: object.meanra,
                meandec: object.meandec,
                e_ra: object.e_ra,
                e_dec: object.e_dec,
                firstmjd: object.firstmjd,
                lastmjd: object.lastmjd,
                ndet: object.ndet,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::prv_candidates::test_support::parent;
    use crate::storage::MemoryStore;
    use crate::types::{Detection, NonDetection};
    use serde_json::json;

    fn detection(aid: &str, oid: &str, candid: i64, new: bool) -> Detection {
        let mut detection = parent("ZTF", oid, candid, json!({}));
        detection.aid = aid.to_string();
        detection.new = new;
        detection
    }

    fn non_detection(aid: &str, mjd: f64, new: bool) -> NonDetection {
        NonDetection {
            aid: aid.to_string(),
            tid: "ZTF".to_string(),
            oid: "Z1".to_string(),
            mjd,
            diffmaglim: 20.5,
            fid: 1,
            e_diffmaglim: None,
            new,
        }
    }

    fn alert(oid: &str, candid: i64) -> Alert {
        serde_json::from_value(json!({
            "tid": "ZTF", "oid": oid, "candid": candid, "mjd": 59000.0, "fid": 1,
            "ra": 10.0, "dec": 10.0, "e_ra": 0.1, "e_dec": 0.1, "mag": 18.0, "e_mag": 0.1,
        }))
        .unwrap()
    }

    fn object(aid: &str, detections: &[Detection], new: bool) -> ObjectRecord {
        let refs: Vec<&Detection> = detections.iter().filter(|d| d.aid == aid).collect();
        let mut object = aggregate(aid, &refs).unwrap();
        object.new = new;
        object
    }

    #[tokio::test]
    async fn test_only_new_rows_are_written() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = PersistenceCoordinator::new(store.clone(), "test-1.0");

        let mut curves = LightCurves {
            detections: vec![detection("A1", "Z1", 1, false), detection("A1", "Z1", 2, true)],
            non_detections: vec![non_detection("A1", 1.0, false), non_detection("A1", 2.0, true)],
        };
        let objects = vec![object("A1", &curves.detections, true)];

        let summary = coordinator.persist(&objects, &mut curves).await.unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                objects_inserted: 1,
                objects_updated: 0,
                detections_inserted: 1,
                non_detections_inserted: 1,
            }
        );

        let stored = store.find_all(EntityKind::Detection, &Filter::All).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["candid"], json!(2));
        assert_eq!(stored[0]["step_id_corr"], json!("test-1.0"));
        assert!(!stored[0].contains_key("new"));

        // Stored rows are left as they were read
        assert_eq!(curves.detections[0].step_id_corr, None);
    }

    #[tokio::test]
    async fn test_existing_objects_are_replaced() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = PersistenceCoordinator::new(store.clone(), "v");

        let mut curves = LightCurves {
            detections: vec![detection("A1", "Z1", 1, true)],
            non_detections: Vec::new(),
        };
        let first = vec![object("A1", &curves.detections, true)];
        coordinator.persist(&first, &mut curves).await.unwrap();

        let mut curves = LightCurves {
            detections: vec![detection("A1", "Z1", 1, false), detection("A1", "Z1", 2, true)],
            non_detections: Vec::new(),
        };
        let second = vec![object("A1", &curves.detections, false)];
        let summary = coordinator.persist(&second, &mut curves).await.unwrap();
        assert_eq!(summary.objects_updated, 1);

        let stored = store.find_all(EntityKind::Object, &Filter::All).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["ndet"], json!(2));
    }

    #[tokio::test]
    async fn test_relational_mirror_follows_identity_when_oid_changes() {
        let document = Arc::new(MemoryStore::new());
        let relational = Arc::new(MemoryStore::new());
        let coordinator =
            PersistenceCoordinator::new(document.clone(), "v").with_relational(relational.clone());

        let mut curves = LightCurves {
            detections: vec![detection("A1", "Z1", 1, true)],
            non_detections: Vec::new(),
        };
        let objects = vec![object("A1", &curves.detections, true)];
        coordinator.persist(&objects, &mut curves).await.unwrap();
        assert_eq!(relational.row_count(EntityKind::Object), 1);
        assert_eq!(relational.row_count(EntityKind::Detection), 1);

        // An earlier detection from another survey takes over the object's oid
        let mut earlier = detection("A1", "ATLAS1", 2, true);
        earlier.mjd -= 1.0;
        let mut stored = detection("A1", "Z1", 1, false);
        stored.step_id_corr = Some("v".to_string());
        let mut curves = LightCurves {
            detections: vec![stored, earlier],
            non_detections: Vec::new(),
        };
        let objects = vec![object("A1", &curves.detections, false)];
        assert_eq!(objects[0].oid, "ATLAS1");

        coordinator.persist(&objects, &mut curves).await.unwrap();

        let rows = relational.find_all(EntityKind::Object, &Filter::All).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["oid"], json!("ATLAS1"));
        assert_eq!(rows[0]["ndet"], json!(2));
    }

    #[tokio::test]
    async fn test_late_attached_mirror_inserts_known_objects() {
        let document = Arc::new(MemoryStore::new());
        let relational = Arc::new(MemoryStore::new());
        let coordinator =
            PersistenceCoordinator::new(document.clone(), "v").with_relational(relational.clone());

        // Already in the document store, never mirrored
        let mut curves = LightCurves {
            detections: vec![detection("A1", "Z1", 1, false), detection("A1", "Z1", 2, true)],
            non_detections: Vec::new(),
        };
        let objects = vec![object("A1", &curves.detections, false)];

        let summary = coordinator.persist(&objects, &mut curves).await.unwrap();
        assert_eq!(summary.objects_updated, 1);
        assert_eq!(relational.row_count(EntityKind::Object), 1);

        let mirrored = coordinator
            .write(StoreKind::Relational, &objects, &curves)
            .await
            .unwrap();
        assert_eq!(mirrored.objects_updated, 1);
        assert_eq!(mirrored.objects_inserted, 0);

        let rows = relational.find_all(EntityKind::Object, &Filter::All).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["aid"], json!("A1"));
    }

    #[tokio::test]
    async fn test_write_without_relational_store_is_noop() {
        let coordinator = PersistenceCoordinator::new(Arc::new(MemoryStore::new()), "v");
        let summary = coordinator
            .write(StoreKind::Relational, &[], &LightCurves::default())
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary::default());
    }

    #[test]
    fn test_one_message_per_identity_from_last_alert() {
        let detections = vec![
            detection("A1", "Z1", 1, true),
            detection("A2", "Z2", 2, true),
            detection("A1", "Z1", 3, true),
        ];
        let curves = LightCurves {
            detections: detections.clone(),
            non_detections: vec![non_detection("A2", 1.0, true)],
        };
        let objects = vec![object("A1", &detections, true), object("A2", &detections, true)];
        let alerts = vec![
            ("A1".to_string(), alert("Z1", 1)),
            ("A2".to_string(), alert("Z2", 2)),
            ("A1".to_string(), alert("Z1", 3)),
        ];

        let messages = build_messages(&alerts, &objects, &curves).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].aid, "A1");
        assert_eq!(messages[0].candid, 3);
        assert_eq!(messages[0].detections.len(), 2);
        assert_eq!(messages[0].ndet, 2);
        assert_eq!(messages[1].non_detections.len(), 1);
    }

    #[tokio::test]
    async fn test_produce_without_producer_builds_but_sends_nothing() {
        let detections = vec![detection("A1", "Z1", 1, true)];
        let curves = LightCurves {
            detections: detections.clone(),
            non_detections: Vec::new(),
        };
        let objects = vec![object("A1", &detections, true)];
        let alerts = vec![("A1".to_string(), alert("Z1", 1))];

        let mut coordinator = PersistenceCoordinator::new(Arc::new(MemoryStore::new()), "v");
        assert_eq!(coordinator.produce(&alerts, &objects, &curves).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_produce_sends_keyed_messages() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let detections = vec![detection("A1", "Z1", 1, true)];
        let curves = LightCurves {
            detections: detections.clone(),
            non_detections: Vec::new(),
        };
        let objects = vec![object("A1", &detections, true)];
        let alerts = vec![("A1".to_string(), alert("Z1", 1))];

        let mut coordinator = PersistenceCoordinator::new(Arc::new(MemoryStore::new()), "v")
            .with_producer(Box::new(crate::producer::ChannelProducer::new(tx)));
        assert_eq!(coordinator.produce(&alerts, &objects, &curves).await.unwrap(), 1);

        let (key, message) = rx.recv().await.unwrap();
        assert_eq!(key, "A1");
        assert_eq!(message.oid, "Z1");
    }
}
