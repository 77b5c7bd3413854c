//! Extraction of history embedded in alerts
//!
//! Surveys ship earlier detections (and, for LSST, forced photometry) inside
//! each alert's `extra_fields`. Extraction turns them into canonical records
//! linked to the owning alert through `parent_candid`, and removes the embedded
//! payload from the alert.

pub mod lsst;
pub mod ztf;

use crate::error::IngestError;
use crate::survey::{Survey, SurveyDispatch};
use crate::types::{Detection, ExtraFields, NonDetection};
use serde_json::{Map, Value};

/// Embedded history for one survey group
pub fn extract<'a, I>(
    survey: Survey,
    group: I,
) -> Result<(Vec<Detection>, Vec<NonDetection>), IngestError>
where
    I: IntoIterator<Item = &'a mut Detection>,
{
    match survey {
        Survey::Ztf => ztf::extract(group),
        Survey::Lsst => lsst::extract(group),
        Survey::Atlas | Survey::Fallback => Ok((Vec::new(), Vec::new())),
    }
}

/// Run extraction per survey-tag group, groups in first-appearance order
///
/// Every tag is dispatched before any alert is touched, so an unsupported
/// survey leaves the batch unmodified.
pub fn extract_batch(
    dispatch: &SurveyDispatch,
    detections: &mut [Detection],
) -> Result<(Vec<Detection>, Vec<NonDetection>), IngestError> {
    let mut groups: Vec<(String, Survey)> = Vec::new();
    for detection in detections.iter() {
        if !groups.iter().any(|(tid, _)| *tid == detection.tid) {
            groups.push((detection.tid.clone(), dispatch.dispatch(&detection.tid)?));
        }
    }

    let mut prv_detections = Vec::new();
    let mut prv_non_detections = Vec::new();
    for (tid, survey) in groups {
        let group = detections.iter_mut().filter(|d| d.tid == tid);
        let (found, non_found) = extract(survey, group)?;
        log::debug!(
            "📜 {}: {} previous detections, {} non-detections",
            tid,
            found.len(),
            non_found.len()
        );
        prv_detections.extend(found);
        prv_non_detections.extend(non_found);
    }

    Ok((prv_detections, prv_non_detections))
}

/// Remove `key` from `extra_fields` and decode it as a list of JSON objects
///
/// Accepts an array or a string holding a serialized array; null or absent is
/// an empty history.
pub(crate) fn take_embedded(
    extra_fields: &mut ExtraFields,
    key: &str,
) -> Result<Vec<Map<String, Value>>, IngestError> {
    let value = match extra_fields.remove(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(&raw)
            .map_err(|e| IngestError::schema(format!("{}: {}", key, e)))?,
        Some(value) => value,
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(map) => Ok(map),
                other => Err(IngestError::schema(format!(
                    "{} entry is not an object: {}",
                    key, other
                ))),
            })
            .collect(),
        other => Err(IngestError::schema(format!("{} is not a list: {}", key, other))),
    }
}

pub(crate) fn take_f64(entry: &mut Map<String, Value>, key: &str) -> Option<f64> {
    entry.remove(key).and_then(|v| v.as_f64())
}

pub(crate) fn take_i64(entry: &mut Map<String, Value>, key: &str) -> Option<i64> {
    entry.remove(key).and_then(|v| v.as_i64())
}

pub(crate) fn require_f64(
    entry: &mut Map<String, Value>,
    key: &str,
    source: &str,
) -> Result<f64, IngestError> {
    take_f64(entry, key)
        .ok_or_else(|| IngestError::schema(format!("{} entry without numeric {}", source, key)))
}

pub(crate) fn require_i64(
    entry: &mut Map<String, Value>,
    key: &str,
    source: &str,
) -> Result<i64, IngestError> {
    take_i64(entry, key)
        .ok_or_else(|| IngestError::schema(format!("{} entry without integer {}", source, key)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{Alert, Detection};
    use serde_json::{json, Value};

    pub fn parent(tid: &str, oid: &str, candid: i64, extra_fields: Value) -> Detection {
        let alert: Alert = serde_json::from_value(json!({
            "tid": tid,
            "oid": oid,
            "candid": candid,
            "mjd": 59000.0,
            "fid": 1,
            "ra": 10.0,
            "dec": 10.0,
            "e_ra": 0.1,
            "e_dec": 0.1,
            "mag": 18.0,
            "e_mag": 0.1,
            "extra_fields": extra_fields,
        }))
        .unwrap();
        Detection::from_alert("A1", &alert)
    }
}
