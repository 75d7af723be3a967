//! Visibility filter (C4): altitude/airmass/twilight gating. Purely
//! functional — no side effects, no I/O.

use chrono::{DateTime, Utc};

use crate::astro::{is_twilight_at, julian_date, radec_to_altaz, TwilightKind};
use crate::model::TargetSet;

const DEFAULT_MAX_AIRMASS: f64 = 2.0;
const MIN_ALTITUDE_FLOOR_DEG: f64 = 10.0;

/// Minimum altitude, in radians, implied by `max_airmass` (floored at 10 deg).
pub fn min_altitude_rad(max_airmass: f64) -> f64 {
    let from_airmass_deg = 90.0 - (1.0 / max_airmass).acos().to_degrees();
    from_airmass_deg.max(MIN_ALTITUDE_FLOOR_DEG).to_radians()
}

/// Retains only targets above the airmass-implied minimum altitude, and only
/// if the site is currently within `twilight_kind`. Returns an empty set
/// otherwise.
pub fn filter(
    targets: &TargetSet,
    lat_rad: f64,
    lon_rad: f64,
    twilight_kind: TwilightKind,
    max_airmass: f64,
    at: DateTime<Utc>,
) -> TargetSet {
    if !is_twilight_at(lat_rad, lon_rad, twilight_kind, at) {
        return Vec::new();
    }

    let min_alt = min_altitude_rad(max_airmass);
    let jd = julian_date(at);
    let ra_rad: Vec<f64> = targets.iter().map(|t| t.ra_deg.to_radians()).collect();
    let dec_rad: Vec<f64> = targets.iter().map(|t| t.dec_deg.to_radians()).collect();
    let (alt, _az) = radec_to_altaz(&ra_rad, &dec_rad, lat_rad, lon_rad, jd);

    targets
        .iter()
        .zip(alt.iter())
        .filter(|(_, &a)| a >= min_alt)
        .map(|(t, _)| t.clone())
        .collect()
}

/// [`filter`] with the default maximum airmass of 2.0.
pub fn filter_default(
    targets: &TargetSet,
    lat_rad: f64,
    lon_rad: f64,
    twilight_kind: TwilightKind,
    at: DateTime<Utc>,
) -> TargetSet {
    filter(targets, lat_rad, lon_rad, twilight_kind, DEFAULT_MAX_AIRMASS, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;
    use chrono::TimeZone;

    #[test]
    fn min_altitude_for_airmass_two_is_thirty_degrees() {
        let alt = min_altitude_rad(2.0).to_degrees();
        assert!((alt - 30.0).abs() < 1e-6);
    }

    #[test]
    fn min_altitude_floors_at_ten_degrees() {
        // airmass 1.0 -> zenith -> implied min alt of 90 deg, floor doesn't
        // apply here; but a very permissive airmass (near-horizon) should
        // still floor at 10 degrees.
        let alt = min_altitude_rad(1.05).to_degrees();
        assert!(alt >= MIN_ALTITUDE_FLOOR_DEG - 1e-9);
    }

    #[test]
    fn filter_returns_empty_outside_twilight() {
        let lat = 32.0_f64.to_radians();
        let lon = -105.5_f64.to_radians();
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 19, 0, 0).unwrap(); // local noon
        let targets = vec![Target::new("a", 10.0, 20.0)];
        let result = filter_default(&targets, lat, lon, TwilightKind::Civil, at);
        assert!(result.is_empty());
    }
}
