use crate::types::Detection;

/// Flux scaling applied to LSST photometry, `10^(-3.9/2.5)`
pub fn flux_factor() -> f64 {
    10f64.powf(-3.9 / 2.5)
}

pub fn correct(detections: Vec<Detection>) -> Vec<Detection> {
    let factor = flux_factor();
    detections
        .into_iter()
        .map(|mut detection| {
            detection.mag *= factor;
            detection.e_mag *= factor;
            detection.corrected = true;
            detection
        })
        .collect()
}
