//! Spherical astronomy primitives: twilight predicates, RA/Dec -> Alt/Az,
//! and the grid spherical-to-Cartesian convention the tessellation ball-tree
//! was built against.
//!
//! The low-precision solar position formula here (good to a few arcminutes)
//! is sufficient for threshold crossing of the twilight altitudes; it is not
//! meant for pointing-grade ephemeris work.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

const DEG_TO_RAD: f64 = PI / 180.0;

/// The three twilight definitions, by the sun's altitude threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwilightKind {
    Civil,
    Nautical,
    Astronomical,
}

impl TwilightKind {
    fn threshold_deg(self) -> f64 {
        match self {
            TwilightKind::Civil => -6.0,
            TwilightKind::Nautical => -12.0,
            TwilightKind::Astronomical => -18.0,
        }
    }
}

/// Julian Date for an instant, via the standard Gregorian-calendar formula.
pub fn julian_date(at: DateTime<Utc>) -> f64 {
    let y = at.date_naive().year_ce().1 as i64;
    let m = at.month() as i64;
    let d = at.day() as i64;
    let (y, m) = if m <= 2 { (y - 1, m + 12) } else { (y, m) };
    let a = y / 100;
    let b = 2 - a + a / 4;
    let day_frac = (at.hour() as f64 * 3600.0
        + at.minute() as f64 * 60.0
        + at.second() as f64
        + at.nanosecond() as f64 / 1e9)
        / 86400.0;
    let jd0 = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * (m as f64 + 1.0)).floor()
        + d as f64
        + b as f64
        - 1524.5;
    jd0 + day_frac
}

/// Greenwich mean sidereal time, in degrees, for a Julian Date.
fn gmst_deg(jd: f64) -> f64 {
    let d = jd - 2451545.0;
    (280.460_618_37 + 360.985_647_366_29 * d).rem_euclid(360.0)
}

/// Low-precision apparent geocentric (RA, Dec) of the Sun, in radians.
fn solar_radec_rad(jd: f64) -> (f64, f64) {
    let n = jd - 2451545.0;
    let mean_longitude = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let mean_anomaly = ((357.528 + 0.985_600_3 * n).rem_euclid(360.0)) * DEG_TO_RAD;
    let ecliptic_longitude_deg = mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin();
    let ecliptic_longitude = ecliptic_longitude_deg * DEG_TO_RAD;
    let obliquity = (23.439 - 0.0000004 * n) * DEG_TO_RAD;

    let ra = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        .rem_euclid(2.0 * PI);
    let dec = (obliquity.sin() * ecliptic_longitude.sin()).asin();
    (ra, dec)
}

/// Converts a batch of (RA, Dec) in radians to (altitude, azimuth) in radians
/// for an observer at `(lat_rad, lon_rad)` at Julian Date `jd`.
pub fn radec_to_altaz(
    ra_rad: &[f64],
    dec_rad: &[f64],
    lat_rad: f64,
    lon_rad: f64,
    jd: f64,
) -> (Vec<f64>, Vec<f64>) {
    let lst_deg = (gmst_deg(jd) + lon_rad.to_degrees()).rem_euclid(360.0);
    let lst_rad = lst_deg * DEG_TO_RAD;

    let mut alt = Vec::with_capacity(ra_rad.len());
    let mut az = Vec::with_capacity(ra_rad.len());
    for (&ra, &dec) in ra_rad.iter().zip(dec_rad.iter()) {
        let hour_angle = lst_rad - ra;
        let sin_alt = dec.sin() * lat_rad.sin() + dec.cos() * lat_rad.cos() * hour_angle.cos();
        let altitude = sin_alt.clamp(-1.0, 1.0).asin();

        let cos_az = (dec.sin() - altitude.sin() * lat_rad.sin()) / (altitude.cos() * lat_rad.cos());
        let mut azimuth = cos_az.clamp(-1.0, 1.0).acos();
        if hour_angle.sin() > 0.0 {
            azimuth = 2.0 * PI - azimuth;
        }
        alt.push(altitude);
        az.push(azimuth);
    }
    (alt, az)
}

/// Single-target convenience wrapper over [`radec_to_altaz`].
pub fn radec_to_altaz_one(ra_rad: f64, dec_rad: f64, lat_rad: f64, lon_rad: f64, jd: f64) -> (f64, f64) {
    let (alt, az) = radec_to_altaz(&[ra_rad], &[dec_rad], lat_rad, lon_rad, jd);
    (alt[0], az[0])
}

/// True iff the sun's altitude at `at` is below the threshold for `kind`.
pub fn is_twilight_at(lat_rad: f64, lon_rad: f64, kind: TwilightKind, at: DateTime<Utc>) -> bool {
    let jd = julian_date(at);
    let (sun_ra, sun_dec) = solar_radec_rad(jd);
    let (sun_alt, _) = radec_to_altaz_one(sun_ra, sun_dec, lat_rad, lon_rad, jd);
    sun_alt.to_degrees() < kind.threshold_deg()
}

/// True iff the sun's altitude right now is below the threshold for `kind`.
pub fn is_twilight(lat_rad: f64, lon_rad: f64, kind: TwilightKind) -> bool {
    is_twilight_at(lat_rad, lon_rad, kind, Utc::now())
}

/// Maps `(ra_rad, dec_rad)` to a unit-sphere point using the grid convention
/// the tessellation ball-tree was built against: `theta = ra`, `phi = dec + 90°`.
///
/// This convention must not be confused with the direct convention used for
/// k-means clustering in [`crate::cluster`] — the two serve different
/// consumers and are deliberately not unified.
pub fn spherical_to_cartesian_grid(ra_rad: f64, dec_rad: f64) -> [f64; 3] {
    let theta = ra_rad;
    let phi = dec_rad + PI / 2.0;
    [phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos()]
}

/// Converts an angular error radius in degrees to the chord-distance radius
/// used by [`crate::grid::TessellationGrid::query_radius`].
pub fn angular_radius_deg_to_chord(delta_deg: f64) -> f64 {
    2.0 * (delta_deg.to_radians() / 2.0).sin()
}
