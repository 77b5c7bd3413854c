//! Survey-independent identity assignment
//!
//! Alerts are grouped by survey object id. Each group is cone-searched once
//! against the object spatial index: a hit reuses the closest stored identity,
//! a miss mints one from the group's first position.
//!
//! New objects in one batch are not cross-matched against each other, since the
//! index only holds objects persisted by earlier batches.

use crate::coordinates::{wgs_scale, GeoPoint, ARCSEC_PER_DEGREE};
use crate::error::IngestError;
use crate::storage::{Row, StorageBackend};
use crate::types::Alert;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_CONE_RADIUS_ARCSEC: f64 = 1.4;

pub struct IdentityResolver {
    store: Arc<dyn StorageBackend>,
    radius_arcsec: f64,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn StorageBackend>, radius_arcsec: f64) -> Self {
        Self { store, radius_arcsec }
    }

    /// Stored identities within `radius_arcsec` of `(ra, dec)`, closest first
    pub async fn cone_search(
        &self,
        ra: f64,
        dec: f64,
        radius_arcsec: f64,
    ) -> Result<Vec<String>, IngestError> {
        let meters = radius_arcsec / ARCSEC_PER_DEGREE * wgs_scale(dec);
        let rows = self.store.nearest(GeoPoint::from_radec(ra, dec), meters).await?;
        rows.iter().map(row_aid).collect()
    }

    /// Pair every alert with its identity, preserving input order
    pub async fn resolve_batch(
        &self,
        alerts: Vec<Alert>,
    ) -> Result<Vec<(String, Alert)>, IngestError> {
        let mut assigned: HashMap<String, String> = HashMap::new();
        let mut matched = 0usize;
        let mut minted = 0usize;

        for alert in &alerts {
            if assigned.contains_key(&alert.oid) {
                continue;
            }
            if !valid_position(alert.ra, alert.dec) {
                return Err(IngestError::InvalidPosition {
                    oid: alert.oid.clone(),
                    ra: alert.ra,
                    dec: alert.dec,
                });
            }

            let hits = self.cone_search(alert.ra, alert.dec, self.radius_arcsec).await?;
            let aid = match hits.into_iter().next() {
                Some(aid) => {
                    matched += 1;
                    aid
                }
                None => {
                    minted += 1;
                    generate_identity(alert.ra, alert.dec)?.to_string()
                }
            };
            log::debug!("🔭 {} -> {}", alert.oid, aid);
            assigned.insert(alert.oid.clone(), aid);
        }

        log::info!(
            "🔭 Resolved {} objects ({} matched, {} new identities)",
            assigned.len(),
            matched,
            minted
        );

        alerts
            .into_iter()
            .map(|alert| {
                let aid = assigned
                    .get(&alert.oid)
                    .cloned()
                    .ok_or_else(|| IngestError::schema(format!("no identity for {}", alert.oid)))?;
                Ok((aid, alert))
            })
            .collect()
    }
}

fn valid_position(ra: f64, dec: f64) -> bool {
    ra.is_finite() && dec.is_finite() && (-90.0..=90.0).contains(&dec)
}

/// Identities are stored as strings; a numeric `aid` would never match the
/// string filters used by the other reads
fn row_aid(row: &Row) -> Result<String, IngestError> {
    match row.get("aid") {
        Some(Value::String(aid)) => Ok(aid.clone()),
        Some(other) => Err(IngestError::schema(format!(
            "object aid must be a string, got {}",
            other
        ))),
        None => Err(IngestError::schema("object row without aid")),
    }
}

/// Mint the 19-digit identity for a position
///
/// Digits, most significant first: a leading 1, RA as `hh mm ss ff` (hours,
/// minutes, seconds, hundredths), the dec sign (1 for north), dec as
/// `dd mm ss f`, and two trailing zeros for duplicates.
pub fn generate_identity(ra: f64, dec: f64) -> Result<u64, IngestError> {
    if !valid_position(ra, dec) {
        return Err(IngestError::InvalidPosition { oid: String::new(), ra, dec });
    }

    let ra = ra.rem_euclid(360.0);
    let hours = ra / 15.0;
    let ra_hh = hours.trunc();
    let ra_mm = ((hours - ra_hh) * 60.0).trunc();
    let ra_ss = (((hours - ra_hh) * 60.0 - ra_mm) * 60.0).trunc();
    let ra_ff = ((((hours - ra_hh) * 60.0 - ra_mm) * 60.0 - ra_ss) * 100.0).trunc();

    let north = u64::from(dec >= 0.0);
    let dec = dec.abs();
    let dec_deg = dec.trunc();
    let dec_mm = ((dec - dec_deg) * 60.0).trunc();
    let dec_ss = (((dec - dec_deg) * 60.0 - dec_mm) * 60.0).trunc();
    let dec_f = ((((dec - dec_deg) * 60.0 - dec_mm) * 60.0 - dec_ss) * 10.0).trunc();

    Ok(1_000_000_000_000_000_000
        + ra_hh as u64 * 10_000_000_000_000_000
        + ra_mm as u64 * 100_000_000_000_000
        + ra_ss as u64 * 1_000_000_000_000
        + ra_ff as u64 * 10_000_000_000
        + north * 1_000_000_000
        + dec_deg as u64 * 10_000_000
        + dec_mm as u64 * 100_000
        + dec_ss as u64 * 1_000
        + dec_f as u64 * 100)
}
