//! Per-survey photometric correction

pub mod lsst;
pub mod ztf;

use crate::error::IngestError;
use crate::survey::{Survey, SurveyDispatch};
use crate::types::Detection;

/// Correct one survey group; every output row has `corrected` decided
pub fn correct(survey: Survey, detections: Vec<Detection>) -> Vec<Detection> {
    match survey {
        Survey::Ztf => ztf::correct(detections),
        Survey::Lsst => lsst::correct(detections),
        Survey::Atlas | Survey::Fallback => detections
            .into_iter()
            .map(|mut detection| {
                detection.corrected = false;
                detection
            })
            .collect(),
    }
}

/// Split by survey tag, correct each group, and concatenate the groups in
/// first-appearance order
///
/// Each corrected row also records its survey `oid` in `extra_fields`, unless
/// the survey already put one there.
pub fn correct_batch(
    dispatch: &SurveyDispatch,
    detections: Vec<Detection>,
) -> Result<Vec<Detection>, IngestError> {
    let mut groups: Vec<(String, Vec<Detection>)> = Vec::new();
    for detection in detections {
        match groups.iter_mut().find(|(tid, _)| *tid == detection.tid) {
            Some((_, group)) => group.push(detection),
            None => groups.push((detection.tid.clone(), vec![detection])),
        }
    }

    let surveys = groups
        .iter()
        .map(|(tid, _)| dispatch.dispatch(tid))
        .collect::<Result<Vec<_>, _>>()?;

    let mut corrected = Vec::new();
    for ((tid, group), survey) in groups.into_iter().zip(surveys) {
        let size = group.len();
        corrected.extend(correct(survey, group).into_iter().map(|mut detection| {
            if !detection.extra_fields.contains_key("oid") {
                let oid = detection.oid.clone();
                detection.extra_fields.insert("oid".to_string(), oid.into());
            }
            detection
        }));
        log::debug!("🧮 Corrected {} {} detections", size, tid);
    }

    Ok(corrected)
}
