use super::{require_f64, require_i64, take_embedded, take_f64, take_i64};
use crate::error::IngestError;
use crate::types::{parse_isdiffpos, Detection, NonDetection};
use serde_json::{Map, Value};

pub const PRV_CANDIDATES_KEY: &str = "prv_candidates";

/// Julian date of the MJD epoch
const MJD_OFFSET: f64 = 2_400_000.5;

/// Positional error (arcsec) per ZTF filter
pub fn position_error(fid: i64) -> Option<f64> {
    match fid {
        1 => Some(0.065),
        2 => Some(0.085),
        3 => Some(0.01),
        _ => None,
    }
}

pub fn extract<'a, I>(group: I) -> Result<(Vec<Detection>, Vec<NonDetection>), IngestError>
where
    I: IntoIterator<Item = &'a mut Detection>,
{
    let mut detections = Vec::new();
    let mut skipped = 0usize;

    for alert in group {
        for entry in take_embedded(&mut alert.extra_fields, PRV_CANDIDATES_KEY)? {
            match from_entry(alert, entry)? {
                Some(detection) => detections.push(detection),
                None => skipped += 1,
            }
        }
    }

    if skipped > 0 {
        log::debug!("⏭️  Skipped {} ZTF prv_candidates without candid", skipped);
    }

    Ok((detections, Vec::new()))
}

fn from_entry(
    parent: &Detection,
    mut entry: Map<String, Value>,
) -> Result<Option<Detection>, IngestError> {
    let candid = match entry.remove("candid") {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| {
                IngestError::schema(format!("prv_candidate candid is not an integer: {}", value))
            })?,
    };

    let jd = require_f64(&mut entry, "jd", PRV_CANDIDATES_KEY)?;
    let fid = require_i64(&mut entry, "fid", PRV_CANDIDATES_KEY)?;
    let ra = require_f64(&mut entry, "ra", PRV_CANDIDATES_KEY)?;
    let dec = require_f64(&mut entry, "dec", PRV_CANDIDATES_KEY)?;
    let e_pos = position_error(fid)
        .ok_or_else(|| IngestError::schema(format!("unknown ZTF filter {}", fid)))?;

    let isdiffpos = match entry.remove("isdiffpos") {
        None => 1,
        Some(value) => parse_isdiffpos(&value)
            .ok_or_else(|| IngestError::schema(format!("invalid isdiffpos: {}", value)))?,
    };

    Ok(Some(Detection {
        aid: parent.aid.clone(),
        tid: parent.tid.clone(),
        oid: parent.oid.clone(),
        candid,
        mjd: jd - MJD_OFFSET,
        fid,
        ra,
        dec,
        e_ra: e_pos,
        e_dec: e_pos,
        rb: take_f64(&mut entry, "rb"),
        rbversion: entry.remove("rbversion").and_then(|v| v.as_str().map(str::to_string)),
        mag: take_f64(&mut entry, "magpsf").unwrap_or(f64::NAN),
        e_mag: take_f64(&mut entry, "sigmapsf").unwrap_or(f64::NAN),
        rfid: take_i64(&mut entry, "rfid"),
        pid: take_i64(&mut entry, "pid"),
        isdiffpos,
        has_stamp: false,
        parent_candid: Some(parent.candid),
        corrected: false,
        magpsf_corr: None,
        sigmapsf_corr: None,
        sigmapsf_corr_ext: None,
        step_id_corr: None,
        extra_fields: entry,
        new: true,
    }))
}
