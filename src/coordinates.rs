//! Sky coordinate math: geodesic scaling, inverse-variance means, and the
//! spherical distance used by the identity spatial index.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// WGS 84 semi-major axis in meters
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS 84 first eccentricity
pub const WGS84_ECCENTRICITY: f64 = 0.081_819_190_842_6;

/// Radius of the sphere the spatial index measures distances on (meters)
pub const SPHERE_RADIUS_METERS: f64 = 6_378_100.0;

pub const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// Meters per degree of arc along the meridian at geodetic latitude `lat`
///
/// Radius of curvature of the WGS 84 meridian arc times one degree in radians.
pub fn wgs_scale(lat: f64) -> f64 {
    let e2 = WGS84_ECCENTRICITY.powi(2);
    let sin_lat = lat.to_radians().sin();
    let rm = WGS84_SEMI_MAJOR_AXIS * (1.0 - e2) / (1.0 - e2 * sin_lat.powi(2)).powf(1.5);
    rm * 1.0_f64.to_radians()
}

/// Unit the per-measurement sigmas are given in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigmaUnit {
    Degrees,
    /// Rescaled to degrees before weighting
    Arcsec,
}

/// Weighted mean with weights `1/σ²`
///
/// Returns `(mean, combined_sigma)` with `combined_sigma = sqrt(1 / Σ 1/σ²)`,
/// always expressed in degrees. Zero or non-finite sigmas produce a NaN mean,
/// which the range checks in [`compute_mean_ra`] / [`compute_mean_dec`] reject.
pub fn inverse_variance_mean(
    values: &[f64],
    sigmas: &[f64],
    unit: SigmaUnit,
) -> Result<(f64, f64), IngestError> {
    if values.is_empty() {
        return Err(IngestError::schema("inverse-variance mean of an empty set"));
    }
    if values.len() != sigmas.len() {
        return Err(IngestError::schema(format!(
            "{} values but {} sigmas",
            values.len(),
            sigmas.len()
        )));
    }

    let scale = match unit {
        SigmaUnit::Degrees => 1.0,
        SigmaUnit::Arcsec => 1.0 / ARCSEC_PER_DEGREE,
    };

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (value, sigma) in values.iter().zip(sigmas) {
        let weight = 1.0 / (sigma * scale).powi(2);
        weighted_sum += value * weight;
        weight_total += weight;
    }

    let mean = weighted_sum / weight_total;
    let combined_sigma = (1.0 / weight_total).sqrt();
    Ok((mean, combined_sigma))
}

/// Mean right ascension, must land in [0, 360)
///
/// RA sigmas are weighted as given.
pub fn compute_mean_ra(ras: &[f64], e_ras: &[f64]) -> Result<(f64, f64), IngestError> {
    let (mean, sigma) = inverse_variance_mean(ras, e_ras, SigmaUnit::Degrees)?;
    if (0.0..360.0).contains(&mean) {
        Ok((mean, sigma))
    } else {
        Err(IngestError::Range { field: "meanra", value: mean })
    }
}

/// Mean declination, must land in [-90, 90]
///
/// Dec sigmas are rescaled from arcseconds to degrees first.
pub fn compute_mean_dec(decs: &[f64], e_decs: &[f64]) -> Result<(f64, f64), IngestError> {
    let (mean, sigma) = inverse_variance_mean(decs, e_decs, SigmaUnit::Arcsec)?;
    if (-90.0..=90.0).contains(&mean) {
        Ok((mean, sigma))
    } else {
        Err(IngestError::Range { field: "meandec", value: mean })
    }
}

/// GeoJSON point on the index sphere: `lon = ra - 180`, `lat = dec`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonPoint", try_from = "GeoJsonPoint")]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn from_radec(ra: f64, dec: f64) -> Self {
        Self { lon: ra - 180.0, lat: dec }
    }
}

#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [point.lon, point.lat],
        }
    }
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = String;

    fn try_from(value: GeoJsonPoint) -> Result<Self, Self::Error> {
        if value.kind != "Point" {
            return Err(format!("expected GeoJSON Point, got {}", value.kind));
        }
        Ok(GeoPoint {
            lon: value.coordinates[0],
            lat: value.coordinates[1],
        })
    }
}

/// Great-circle distance in meters (haversine)
pub fn sphere_distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * SPHERE_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Angular span in degrees of `meters` on the index sphere
pub fn meters_to_degrees(meters: f64) -> f64 {
    (meters / SPHERE_RADIUS_METERS).to_degrees()
}
