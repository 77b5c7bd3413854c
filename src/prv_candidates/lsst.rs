use super::{require_f64, require_i64, take_embedded};
use crate::correction::lsst::flux_factor;
use crate::error::IngestError;
use crate::types::{Detection, NonDetection};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const PRV_SOURCES_KEY: &str = "prvDiaSources";
pub const FORCED_SOURCES_KEY: &str = "prvDiaForcedSources";

const POSITION_ERROR: f64 = 0.001;

/// Filter id for an LSST band name (u, g, r, i, z, Y)
pub fn filter_id(filter_name: &str) -> Option<i64> {
    match filter_name {
        "u" => Some(0),
        "g" => Some(1),
        "r" => Some(2),
        "i" => Some(3),
        "z" => Some(4),
        "Y" => Some(5),
        _ => None,
    }
}

fn take_filter(entry: &mut Map<String, Value>, source: &str) -> Result<i64, IngestError> {
    let name = entry.remove("filterName");
    name.as_ref()
        .and_then(Value::as_str)
        .and_then(filter_id)
        .ok_or_else(|| {
            IngestError::schema(format!("{} entry with unknown filterName {:?}", source, name))
        })
}

/// Previous sources become detections; a repeated `diaSourceId` keeps its
/// first position but the last occurrence's content
pub fn extract<'a, I>(group: I) -> Result<(Vec<Detection>, Vec<NonDetection>), IngestError>
where
    I: IntoIterator<Item = &'a mut Detection>,
{
    let mut detections: Vec<Detection> = Vec::new();
    let mut positions: HashMap<i64, usize> = HashMap::new();
    let mut non_detections = Vec::new();
    let factor = flux_factor();

    for alert in group {
        for entry in take_embedded(&mut alert.extra_fields, PRV_SOURCES_KEY)? {
            let detection = detection_from_source(alert, entry)?;
            match positions.get(&detection.candid) {
                Some(&index) => detections[index] = detection,
                None => {
                    positions.insert(detection.candid, detections.len());
                    detections.push(detection);
                }
            }
        }

        for mut entry in take_embedded(&mut alert.extra_fields, FORCED_SOURCES_KEY)? {
            let fid = take_filter(&mut entry, FORCED_SOURCES_KEY)?;
            let mjd = require_f64(&mut entry, "midPointTai", FORCED_SOURCES_KEY)?;
            let flux = require_f64(&mut entry, "psFlux", FORCED_SOURCES_KEY)?;
            let flux_err = entry.remove("psFluxErr").and_then(|v| v.as_f64());

            non_detections.push(NonDetection {
                aid: alert.aid.clone(),
                tid: alert.tid.clone(),
                oid: alert.oid.clone(),
                mjd,
                diffmaglim: flux * factor,
                fid,
                e_diffmaglim: flux_err.map(|e| e * factor),
                new: true,
            });
        }
    }

    Ok((detections, non_detections))
}

fn detection_from_source(
    parent: &Detection,
    mut entry: Map<String, Value>,
) -> Result<Detection, IngestError> {
    let candid = require_i64(&mut entry, "diaSourceId", PRV_SOURCES_KEY)?;
    let fid = take_filter(&mut entry, PRV_SOURCES_KEY)?;

    Ok(Detection {
        aid: parent.aid.clone(),
        tid: parent.tid.clone(),
        oid: parent.oid.clone(),
        candid,
        mjd: require_f64(&mut entry, "midPointTai", PRV_SOURCES_KEY)?,
        fid,
        ra: require_f64(&mut entry, "ra", PRV_SOURCES_KEY)?,
        dec: require_f64(&mut entry, "decl", PRV_SOURCES_KEY)?,
        e_ra: POSITION_ERROR,
        e_dec: POSITION_ERROR,
        rb: None,
        rbversion: None,
        mag: entry.remove("psFlux").and_then(|v| v.as_f64()).unwrap_or(f64::NAN),
        e_mag: entry.remove("psFluxErr").and_then(|v| v.as_f64()).unwrap_or(f64::NAN),
        rfid: None,
        pid: Some(0),
        isdiffpos: 0,
        has_stamp: false,
        parent_candid: Some(parent.candid),
        corrected: false,
        magpsf_corr: None,
        sigmapsf_corr: None,
        sigmapsf_corr_ext: None,
        step_id_corr: None,
        extra_fields: entry,
        new: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prv_candidates::test_support::parent;
    use serde_json::json;

    fn source(id: i64, flux: f64, filter: &str) -> Value {
        json!({
            "diaSourceId": id,
            "midPointTai": 60000.25,
            "ra": 10.0,
            "decl": -5.0,
            "psFlux": flux,
            "psFluxErr": 2.0,
            "filterName": filter,
            "snr": 12.0,
        })
    }

    #[test]
    fn test_sources_become_detections() {
        let mut group = vec![parent(
            "LSST",
            "L1",
            50,
            json!({"prvDiaSources": [source(10, 100.0, "r")]}),
        )];

        let (detections, non_detections) = extract(group.iter_mut()).unwrap();
        assert!(non_detections.is_empty());
        let prv = &detections[0];
        assert_eq!(prv.candid, 10);
        assert_eq!(prv.fid, 2);
        assert_eq!(prv.dec, -5.0);
        assert_eq!(prv.mag, 100.0);
        assert_eq!(prv.e_ra, 0.001);
        assert_eq!(prv.isdiffpos, 0);
        assert_eq!(prv.pid, Some(0));
        assert_eq!(prv.parent_candid, Some(50));
        assert_eq!(prv.extra_fields["snr"], json!(12.0));
        assert!(group[0].extra_fields.is_empty());
    }

    #[test]
    fn test_repeated_source_keeps_last_content() {
        let mut group = vec![
            parent(
                "LSST",
                "L1",
                50,
                json!({"prvDiaSources": [source(10, 100.0, "g"), source(11, 5.0, "g")]}),
            ),
            parent("LSST", "L1", 51, json!({"prvDiaSources": [source(10, 200.0, "g")]})),
        ];

        let (detections, _) = extract(group.iter_mut()).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].candid, 10);
        assert_eq!(detections[0].mag, 200.0);
        assert_eq!(detections[0].parent_candid, Some(51));
        assert_eq!(detections[1].candid, 11);
    }

    #[test]
    fn test_forced_sources_become_scaled_non_detections() {
        let forced = json!([{
            "midPointTai": 59999.5, "psFlux": 1000.0, "psFluxErr": 10.0, "filterName": "Y",
        }]);
        let mut group = vec![parent("LSST", "L1", 50, json!({"prvDiaForcedSources": forced}))];

        let (detections, non_detections) = extract(group.iter_mut()).unwrap();
        assert!(detections.is_empty());
        assert_eq!(non_detections.len(), 1);

        let forced = &non_detections[0];
        assert_eq!(forced.fid, 5);
        assert_eq!(forced.mjd, 59999.5);
        assert!((forced.diffmaglim - 1000.0 * flux_factor()).abs() < 1e-9);
        assert!((forced.e_diffmaglim.unwrap() - 10.0 * flux_factor()).abs() < 1e-9);
        assert!(forced.new);
    }

    #[test]
    fn test_unknown_filter_is_schema_error() {
        let mut group = vec![parent(
            "LSST",
            "L1",
            50,
            json!({"prvDiaSources": [source(10, 1.0, "x")]}),
        )];
        assert!(matches!(extract(group.iter_mut()), Err(IngestError::Schema(_))));
    }
}
