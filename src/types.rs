//! Canonical record types shared by every stage of the ingestion pipeline
//!
//! All types serialize to the storage row layout (one JSON object per record).
//! Transient flags such as `new` are never serialized.

use crate::coordinates::GeoPoint;
use crate::error::IngestError;
use crate::storage::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Survey-specific fields carried alongside a record
pub type ExtraFields = Map<String, Value>;

/// One raw observation as published by a survey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Survey tag (ZTF, ATLAS, LSST, ...)
    pub tid: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub oid: String,
    pub candid: i64,
    pub mjd: f64,
    pub fid: i64,
    pub ra: f64,
    pub dec: f64,
    pub e_ra: f64,
    pub e_dec: f64,
    #[serde(deserialize_with = "de_nullable_f64")]
    pub mag: f64,
    #[serde(deserialize_with = "de_nullable_f64")]
    pub e_mag: f64,
    #[serde(default = "default_isdiffpos", deserialize_with = "de_isdiffpos")]
    pub isdiffpos: i32,
    #[serde(default)]
    pub rb: Option<f64>,
    #[serde(default)]
    pub rbversion: Option<String>,
    #[serde(default)]
    pub rfid: Option<i64>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub extra_fields: ExtraFields,
}

impl Alert {
    /// Parse an alert from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, IngestError> {
        let alert: Alert = serde_json::from_str(line)?;
        Ok(alert)
    }
}

/// Positive brightness measurement, keyed by `(aid, candid)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(deserialize_with = "de_string_or_number")]
    pub aid: String,
    pub tid: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub oid: String,
    pub candid: i64,
    pub mjd: f64,
    pub fid: i64,
    pub ra: f64,
    pub dec: f64,
    pub e_ra: f64,
    pub e_dec: f64,
    #[serde(default)]
    pub rb: Option<f64>,
    #[serde(default)]
    pub rbversion: Option<String>,
    #[serde(deserialize_with = "de_nullable_f64")]
    pub mag: f64,
    #[serde(deserialize_with = "de_nullable_f64")]
    pub e_mag: f64,
    #[serde(default)]
    pub rfid: Option<i64>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default = "default_isdiffpos", deserialize_with = "de_isdiffpos")]
    pub isdiffpos: i32,
    pub has_stamp: bool,
    #[serde(default)]
    pub parent_candid: Option<i64>,
    #[serde(default)]
    pub corrected: bool,
    #[serde(default)]
    pub magpsf_corr: Option<f64>,
    #[serde(default)]
    pub sigmapsf_corr: Option<f64>,
    #[serde(default)]
    pub sigmapsf_corr_ext: Option<f64>,
    #[serde(default)]
    pub step_id_corr: Option<String>,
    #[serde(default)]
    pub extra_fields: ExtraFields,

    /// Not yet in storage (set during reconciliation, never persisted)
    #[serde(skip)]
    pub new: bool,
}

impl Detection {
    /// Live detection built from an alert that was assigned identity `aid`
    pub fn from_alert(aid: &str, alert: &Alert) -> Self {
        Self {
            aid: aid.to_string(),
            tid: alert.tid.clone(),
            oid: alert.oid.clone(),
            candid: alert.candid,
            mjd: alert.mjd,
            fid: alert.fid,
            ra: alert.ra,
            dec: alert.dec,
            e_ra: alert.e_ra,
            e_dec: alert.e_dec,
            rb: alert.rb,
            rbversion: alert.rbversion.clone(),
            mag: alert.mag,
            e_mag: alert.e_mag,
            rfid: alert.rfid,
            pid: alert.pid,
            isdiffpos: alert.isdiffpos,
            has_stamp: true,
            parent_candid: None,
            corrected: false,
            magpsf_corr: None,
            sigmapsf_corr: None,
            sigmapsf_corr_ext: None,
            step_id_corr: None,
            extra_fields: alert.extra_fields.clone(),
            new: true,
        }
    }
}

/// Assertion that nothing was seen above `diffmaglim` at `mjd` in filter `fid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonDetection {
    #[serde(deserialize_with = "de_string_or_number")]
    pub aid: String,
    pub tid: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub oid: String,
    pub mjd: f64,
    #[serde(deserialize_with = "de_nullable_f64")]
    pub diffmaglim: f64,
    pub fid: i64,
    /// Only present for forced photometry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_diffmaglim: Option<f64>,

    #[serde(skip)]
    pub new: bool,
}

/// Aggregate entity per identity, always recomputed from the full history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    #[serde(deserialize_with = "de_string_or_number")]
    pub aid: String,
    pub tid: String,
    #[serde(deserialize_with = "de_string_or_number")]
    pub oid: String,
    pub lastmjd: f64,
    pub firstmjd: f64,
    pub meanra: f64,
    pub meandec: f64,
    pub e_ra: f64,
    pub e_dec: f64,
    pub ndet: i64,
    /// Spatial index point (`[meanra - 180, meandec]`)
    pub loc: GeoPoint,

    /// Not previously in the object store (insert instead of update)
    #[serde(skip)]
    pub new: bool,
}

/// One light curve per identity, sent to the output producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightCurveMessage {
    pub aid: String,
    pub oid: String,
    /// Last alert of this identity in the batch
    pub candid: i64,
    pub detections: Vec<Detection>,
    pub non_detections: Vec<NonDetection>,
    pub meanra: f64,
    pub meandec: f64,
    pub e_ra: f64,
    pub e_dec: f64,
    pub firstmjd: f64,
    pub lastmjd: f64,
    pub ndet: i64,
}

/// Serialize a record into a storage row
///
/// NaN and infinities become JSON `null`, which is the storage null.
pub fn to_row<T: Serialize>(record: &T) -> Result<Row, IngestError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(IngestError::schema(format!(
            "record did not serialize to an object: {}",
            other
        ))),
    }
}

/// Deserialize a storage row, naming the entity on failure
pub fn from_row<T: DeserializeOwned>(entity: &str, row: Row) -> Result<T, IngestError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| IngestError::schema(format!("{} row: {}", entity, e)))
}

fn default_isdiffpos() -> i32 {
    1
}

/// Accept ids stored either as JSON strings or numbers
fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Storage null reads back as NaN
fn de_nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Difference-image sign: 1 / -1 / 0, or ZTF's "t" / "f"
fn de_isdiffpos<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_isdiffpos(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid isdiffpos: {}", value)))
}

pub(crate) fn parse_isdiffpos(value: &Value) -> Option<i32> {
    match value {
        Value::Null => Some(1),
        Value::Bool(b) => Some(if *b { 1 } else { -1 }),
        Value::Number(n) => match n.as_i64() {
            Some(v) => Some(v.signum() as i32),
            // Float-encoded flags such as 1.0 / -1.0
            None => n.as_f64().filter(|v| v.is_finite()).map(|v| {
                if v > 0.0 {
                    1
                } else if v < 0.0 {
                    -1
                } else {
                    0
                }
            }),
        },
        Value::String(s) => match s.as_str() {
            "t" | "1" => Some(1),
            "f" | "-1" => Some(-1),
            "0" => Some(0),
            _ => None,
        },
        _ => None,
    }
}
