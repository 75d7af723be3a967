//! GRB handler (C8): gamma-ray-burst alerts with a single RA/Dec and error
//! radius, resolved against the tessellation grid.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::astro::{angular_radius_deg_to_chord, spherical_to_cartesian_grid};
use crate::error::{Result, SchedulerError};
use crate::grid::TessellationGrid;
use crate::model::{Schedule, Target};

const EVENT_EXPIRY_MINUTES: i64 = 30;
const MAX_FIELDS: usize = 100;

/// Fixed systematic error inflation: `sqrt(3.25^2 + 2.07^2) / 2`.
fn systematic_error_deg() -> f64 {
    (3.25_f64.powi(2) + 2.07_f64.powi(2)).sqrt() / 2.0
}

/// The fields of a parsed Fermi GBM VOEvent this handler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GrbAlert {
    pub trig_id: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub error_radius_deg: f64,
}

/// Reads `C1` (RA deg), `C2` (Dec deg), `Error2Radius` (deg), and a TrigID
/// identifier from a Fermi GBM VOEvent. Drops on any missing element.
pub fn parse_grb_xml(xml: &str) -> Result<GrbAlert> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| SchedulerError::MalformedAlert(format!("invalid XML: {e}")))?;
    let root = doc.root_element();

    let param = |name: &str| -> Option<String> {
        root.descendants()
            .filter(|n| n.has_tag_name("Param"))
            .find(|n| n.attribute("name") == Some(name))
            .and_then(|n| n.attribute("value"))
            .map(str::to_string)
    };

    let require_f64 = |name: &str| -> Result<f64> {
        param(name)
            .ok_or_else(|| SchedulerError::MalformedAlert(format!("missing {name}")))?
            .parse()
            .map_err(|_| SchedulerError::MalformedAlert(format!("non-numeric {name}")))
    };

    let trig_id = root
        .attribute("ivorn")
        .map(str::to_string)
        .or_else(|| param("TrigID"))
        .ok_or_else(|| SchedulerError::MalformedAlert("missing TrigID".into()))?;

    Ok(GrbAlert {
        trig_id,
        ra_deg: require_f64("C1")?,
        dec_deg: require_f64("C2")?,
        error_radius_deg: require_f64("Error2Radius")?,
    })
}

/// Outcome of processing one GRB message.
#[derive(Debug)]
pub enum GrbOutcome {
    Published(Schedule),
    Rejected(&'static str),
}

/// Full C8 decision sequence: inflate the error radius by the fixed
/// systematic, ball-query the grid, and drop under-localized alerts.
pub fn process_grb_alert(alert: &GrbAlert, grid: &TessellationGrid, now: DateTime<Utc>) -> GrbOutcome {
    let inflated_error_deg = alert.error_radius_deg + systematic_error_deg();
    let chord_radius = angular_radius_deg_to_chord(inflated_error_deg);
    let center = spherical_to_cartesian_grid(alert.ra_deg.to_radians(), alert.dec_deg.to_radians());

    let hits = grid.query_radius(center, chord_radius);
    if hits.len() > MAX_FIELDS {
        return GrbOutcome::Rejected("under-localized");
    }

    let targets = hits
        .iter()
        .map(|hit| {
            let field = grid.field(hit.index);
            Target::new(
                format!("field_{}", hit.index),
                field.ra_rad.to_degrees(),
                field.dec_rad.to_degrees(),
            )
        })
        .collect();

    let expiration = now + ChronoDuration::minutes(EVENT_EXPIRY_MINUTES);
    GrbOutcome::Published(Schedule::event(alert.trig_id.clone(), targets, 1, expiration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridField;

    fn sample_grid(n: usize) -> TessellationGrid {
        let fields = (0..n)
            .map(|i| GridField {
                ra_rad: (i as f64) * (360.0 / n as f64).to_radians(),
                dec_rad: 0.0,
            })
            .collect();
        TessellationGrid::from_fields(fields)
    }

    fn xml(ra: &str, dec: &str, error: &str) -> String {
        format!(
            r#"<voe:VOEvent xmlns:voe="http://www.ivoa.net/xml/VOEvent/v2.0" ivorn="ivo://nasa.gsfc.gcn/Fermi#GBM_Gnd_Pos_700000000">
                <What>
                    <Param name="C1" value="{ra}"/>
                    <Param name="C2" value="{dec}"/>
                    <Param name="Error2Radius" value="{error}"/>
                </What>
            </voe:VOEvent>"#
        )
    }

    #[test]
    fn parses_position_and_error() {
        let doc = xml("10.0", "20.0", "5.0");
        let alert = parse_grb_xml(&doc).unwrap();
        assert_eq!(alert.ra_deg, 10.0);
        assert_eq!(alert.dec_deg, 20.0);
        assert_eq!(alert.error_radius_deg, 5.0);
        assert!(alert.trig_id.contains("GBM_Gnd_Pos"));
    }

    #[test]
    fn missing_element_is_rejected() {
        let doc = r#"<voe:VOEvent xmlns:voe="http://www.ivoa.net/xml/VOEvent/v2.0" ivorn="x">
            <What><Param name="C1" value="10.0"/></What>
        </voe:VOEvent>"#;
        assert!(parse_grb_xml(doc).is_err());
    }

    #[test]
    fn well_localized_alert_is_published() {
        let grid = sample_grid(20);
        let alert = GrbAlert {
            trig_id: "700000000".into(),
            ra_deg: 0.0,
            dec_deg: 0.0,
            error_radius_deg: 1.0,
        };
        match process_grb_alert(&alert, &grid, Utc::now()) {
            GrbOutcome::Published(schedule) => {
                assert_eq!(schedule.name, "700000000");
                assert!(!schedule.targets.is_empty());
                assert_eq!(schedule.priority, 1);
            }
            GrbOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn under_localized_alert_is_dropped() {
        // A dense grid (many fields on the equator) plus a huge error
        // radius pulls in more than MAX_FIELDS fields.
        let grid = sample_grid(400);
        let alert = GrbAlert {
            trig_id: "700000001".into(),
            ra_deg: 0.0,
            dec_deg: 0.0,
            error_radius_deg: 180.0,
        };
        match process_grb_alert(&alert, &grid, Utc::now()) {
            GrbOutcome::Rejected(_) => {}
            GrbOutcome::Published(_) => panic!("expected rejection for under-localized alert"),
        }
    }
}
