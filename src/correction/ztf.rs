//! ZTF reference-flux correction
//!
//! Sources closer than 1.4" to a reference-image source get their difference
//! magnitude recombined with the reference flux (`magnr`, `sigmagnr`).

use crate::types::Detection;
use serde_json::Value;

/// Max `distnr` (arcsec) for a detection to be corrected
pub const DISTANCE_THRESHOLD: f64 = 1.4;

/// Magnitude reported when the corrected flux is unphysical
pub const MAG_UPPER_LIMIT: f64 = 100.0;

fn extra_f64(detection: &Detection, key: &str) -> f64 {
    detection
        .extra_fields
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or(f64::NAN)
}

pub fn correct(detections: Vec<Detection>) -> Vec<Detection> {
    detections.into_iter().map(correct_one).collect()
}

fn correct_one(mut detection: Detection) -> Detection {
    let distnr = extra_f64(&detection, "distnr");
    detection.corrected = distnr < DISTANCE_THRESHOLD;

    if !detection.corrected {
        detection.magpsf_corr = None;
        detection.sigmapsf_corr = None;
        detection.sigmapsf_corr_ext = None;
        return detection;
    }

    let magnr = extra_f64(&detection, "magnr");
    let sigmagnr = extra_f64(&detection, "sigmagnr");

    let aux1 = 10f64.powf(-0.4 * magnr);
    let aux2 = 10f64.powf(-0.4 * detection.mag);
    let aux3 = aux1 + f64::from(detection.isdiffpos) * aux2;

    if aux3 > 0.0 {
        let radicand = aux2.powi(2) * detection.e_mag.powi(2) - aux1.powi(2) * sigmagnr.powi(2);
        detection.magpsf_corr = Some(-2.5 * aux3.log10());
        detection.sigmapsf_corr = Some(if radicand < 0.0 {
            MAG_UPPER_LIMIT
        } else {
            radicand.sqrt() / aux3
        });
        detection.sigmapsf_corr_ext = Some(aux2 * detection.e_mag / aux3);
    } else {
        detection.magpsf_corr = Some(MAG_UPPER_LIMIT);
        detection.sigmapsf_corr = Some(MAG_UPPER_LIMIT);
        detection.sigmapsf_corr_ext = Some(MAG_UPPER_LIMIT);
    }

    detection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prv_candidates::test_support::parent;
    use serde_json::json;

    #[test]
    fn test_far_from_reference_is_not_corrected() {
        let extra = json!({"distnr": 2.0, "magnr": 17.0, "sigmagnr": 0.02});
        let detection = parent("ZTF", "Z1", 1, extra);
        let out = correct(vec![detection]);
        assert!(!out[0].corrected);
        assert_eq!(out[0].magpsf_corr, None);
        assert_eq!(out[0].sigmapsf_corr_ext, None);
    }

    #[test]
    fn test_missing_distnr_is_not_corrected() {
        let out = correct(vec![parent("ZTF", "Z1", 1, json!({}))]);
        assert!(!out[0].corrected);
    }

    #[test]
    fn test_positive_difference_adds_reference_flux() {
        // mag 18 on a 18 mag reference: twice the flux, 0.753 mag brighter
        let extra = json!({"distnr": 0.3, "magnr": 18.0, "sigmagnr": 0.0});
        let detection = parent("ZTF", "Z1", 1, extra);
        let out = correct(vec![detection]);

        let expected = 18.0 - 2.5 * 2f64.log10();
        assert!(out[0].corrected);
        assert!((out[0].magpsf_corr.unwrap() - expected).abs() < 1e-9);
        // Half of the flux carries the 0.1 error
        assert!((out[0].sigmapsf_corr.unwrap() - 0.05).abs() < 1e-9);
        assert!((out[0].sigmapsf_corr_ext.unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_negative_total_flux_gives_upper_limit() {
        let extra = json!({"distnr": 0.3, "magnr": 18.0, "sigmagnr": 0.01});
        let mut detection = parent("ZTF", "Z1", 1, extra);
        detection.isdiffpos = -1;
        detection.mag = 17.0;

        let out = correct(vec![detection]);
        assert_eq!(out[0].magpsf_corr, Some(MAG_UPPER_LIMIT));
        assert_eq!(out[0].sigmapsf_corr, Some(MAG_UPPER_LIMIT));
        assert_eq!(out[0].sigmapsf_corr_ext, Some(MAG_UPPER_LIMIT));
    }

    #[test]
    fn test_negative_radicand_gives_sigma_upper_limit() {
        // Reference error dominates the difference error
        let extra = json!({"distnr": 0.3, "magnr": 18.0, "sigmagnr": 0.5});
        let detection = parent("ZTF", "Z1", 1, extra);
        let out = correct(vec![detection]);
        assert!(out[0].magpsf_corr.unwrap() < 18.0);
        assert_eq!(out[0].sigmapsf_corr, Some(MAG_UPPER_LIMIT));
    }
}
