//! LVC handler (C7): gravitational-wave candidate alerts. Parses the VOEvent
//! XML, applies the significance gates, tiles the 90% credible region onto
//! the tessellation grid, and produces the event `Schedule` to publish.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::{Result, SchedulerError};
use crate::grid::TessellationGrid;
use crate::model::{Schedule, Target};

const EVENT_EXPIRY_MINUTES: i64 = 30;
const TERRESTRIAL_REJECT_ABOVE: f64 = 0.9;
const FAR_REJECT_ABOVE: f64 = 1e-8;
const CUMULATIVE_PROBABILITY_TARGET: f64 = 0.9;
const DEFAULT_FIELD_CUTOFF: usize = 100;
const BBH_FIELD_CUTOFF: usize = 10;
const BBH_CUTOFF_THRESHOLD: f64 = 0.9;

/// The fields of a parsed LVC VOEvent this handler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LvcAlert {
    pub role: String,
    pub alert_type: String,
    pub grace_id: String,
    pub terrestrial: f64,
    pub far: f64,
    pub bbh: f64,
    pub skymap_url: Option<String>,
}

/// One already-resolved skymap pixel: its field-grid-queryable sky position,
/// probability density, and solid angle. Decoding the multi-order FITS/HEALPix
/// table into this shape is delegated to [`SkymapFetcher`] — out of scope
/// for this crate beyond querying the precomputed grid.
#[derive(Debug, Clone, Copy)]
pub struct SkymapPixel {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub probdensity: f64,
    pub area_sr: f64,
}

/// Fetches and decodes the multi-order probability skymap referenced by an
/// LVC alert's `skymap_fits` URL.
#[async_trait]
pub trait SkymapFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<SkymapPixel>>;
}

/// Reads the top-level `role` attribute and the VOEvent `Param` elements
/// this handler needs, ignoring XML namespace prefixes.
pub fn parse_lvc_xml(xml: &str) -> Result<LvcAlert> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| SchedulerError::MalformedAlert(format!("invalid XML: {e}")))?;
    let root = doc.root_element();
    let role = root
        .attribute("role")
        .ok_or_else(|| SchedulerError::MalformedAlert("missing role attribute".into()))?
        .to_string();

    let param = |name: &str| -> Option<String> {
        root.descendants()
            .filter(|n| n.has_tag_name("Param"))
            .find(|n| n.attribute("name") == Some(name))
            .and_then(|n| n.attribute("value"))
            .map(str::to_string)
    };

    let alert_type = param("AlertType")
        .ok_or_else(|| SchedulerError::MalformedAlert("missing AlertType".into()))?;
    let grace_id =
        param("GraceID").ok_or_else(|| SchedulerError::MalformedAlert("missing GraceID".into()))?;

    let parse_f64 = |name: &str, default: f64| -> Result<f64> {
        match param(name) {
            Some(raw) => raw
                .parse()
                .map_err(|_| SchedulerError::MalformedAlert(format!("non-numeric {name}"))),
            None => Ok(default),
        }
    };

    Ok(LvcAlert {
        role,
        alert_type,
        grace_id,
        terrestrial: parse_f64("Terrestrial", 0.0)?,
        far: parse_f64("FAR", 0.0)?,
        bbh: parse_f64("BBH", 0.0)?,
        skymap_url: param("skymap_fits"),
    })
}

/// Sorts pixels by descending probability density, takes the longest
/// prefix whose cumulative probability (`area * probdensity`) stays below
/// `target` (the pixel that would cross it is excluded, matching a
/// `searchsorted`-then-slice cut on the cumulative sum), maps each to its
/// nearest grid field, and accumulates probability per field. Returns
/// `(field_index, accumulated_probability)` sorted by descending
/// probability.
pub fn tile_credible_region(
    pixels: &[SkymapPixel],
    grid: &TessellationGrid,
    target: f64,
) -> Vec<(usize, f64)> {
    let mut sorted = pixels.to_vec();
    sorted.sort_by(|a, b| b.probdensity.partial_cmp(&a.probdensity).unwrap());

    let mut cumulative = 0.0;
    let mut selected = Vec::new();
    for pixel in &sorted {
        let prob = pixel.area_sr * pixel.probdensity;
        if cumulative + prob >= target {
            break;
        }
        cumulative += prob;
        selected.push((*pixel, prob));
    }

    let mut per_field: std::collections::HashMap<usize, f64> = std::collections::HashMap::new();
    for (pixel, prob) in selected {
        let xyz = crate::astro::spherical_to_cartesian_grid(
            pixel.ra_deg.to_radians(),
            pixel.dec_deg.to_radians(),
        );
        let hits = grid.query_radius(xyz, f64::EPSILON.sqrt());
        let nearest = hits.first().map(|h| h.index).unwrap_or_else(|| {
            // fall back to the globally nearest field if the epsilon ball missed
            (0..grid.len())
                .min_by(|&a, &b| {
                    let field_a = grid.field(a);
                    let field_b = grid.field(b);
                    let xa = crate::astro::spherical_to_cartesian_grid(field_a.ra_rad, field_a.dec_rad);
                    let xb = crate::astro::spherical_to_cartesian_grid(field_b.ra_rad, field_b.dec_rad);
                    let da: f64 = (0..3).map(|i| (xa[i] - xyz[i]).powi(2)).sum();
                    let db: f64 = (0..3).map(|i| (xb[i] - xyz[i]).powi(2)).sum();
                    da.partial_cmp(&db).unwrap()
                })
                .unwrap_or(0)
        });
        *per_field.entry(nearest).or_insert(0.0) += prob;
    }

    let mut result: Vec<(usize, f64)> = per_field.into_iter().collect();
    result.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    result
}

/// Converts tiled field indices to degree-space targets named after the
/// field's grid position.
pub fn fields_to_targets(grid: &TessellationGrid, tiled: &[(usize, f64)]) -> Vec<Target> {
    tiled
        .iter()
        .map(|(index, _prob)| {
            let field = grid.field(*index);
            Target::new(
                format!("field_{index}"),
                field.ra_rad.to_degrees(),
                field.dec_rad.to_degrees(),
            )
        })
        .collect()
}

/// Outcome of processing one LVC message.
#[derive(Debug)]
pub enum LvcOutcome {
    Published(Schedule),
    Retraction(Schedule),
    Rejected(&'static str),
}

/// Full C7 decision sequence, given an already-fetched pixel table (empty
/// for a Retraction, where no skymap is fetched).
pub fn process_lvc_alert(
    alert: &LvcAlert,
    pixels: &[SkymapPixel],
    grid: &TessellationGrid,
    now: DateTime<Utc>,
) -> LvcOutcome {
    if alert.role != "observation" {
        return LvcOutcome::Rejected("role is not observation");
    }
    if alert.alert_type == "Retraction" {
        return LvcOutcome::Retraction(Schedule::retraction(alert.grace_id.clone(), now));
    }
    if alert.terrestrial > TERRESTRIAL_REJECT_ABOVE {
        return LvcOutcome::Rejected("Terrestrial probability too high");
    }
    if alert.far > FAR_REJECT_ABOVE {
        return LvcOutcome::Rejected("FAR too high");
    }

    let tiled = tile_credible_region(pixels, grid, CUMULATIVE_PROBABILITY_TARGET);
    let cutoff = if alert.bbh > BBH_CUTOFF_THRESHOLD {
        BBH_FIELD_CUTOFF
    } else {
        DEFAULT_FIELD_CUTOFF
    };
    if tiled.len() > cutoff {
        return LvcOutcome::Rejected("localization too coarse");
    }

    let targets = fields_to_targets(grid, &tiled);
    let expiration = now + ChronoDuration::minutes(EVENT_EXPIRY_MINUTES);
    LvcOutcome::Published(Schedule::event(alert.grace_id.clone(), targets, 1, expiration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridField;

    fn sample_grid() -> TessellationGrid {
        let fields = (0..36)
            .map(|i| GridField {
                ra_rad: (i as f64) * 10.0_f64.to_radians(),
                dec_rad: 0.0,
            })
            .collect();
        TessellationGrid::from_fields(fields)
    }

    fn xml(role: &str, alert_type: &str, extra: &str) -> String {
        format!(
            r#"<voe:VOEvent xmlns:voe="http://www.ivoa.net/xml/VOEvent/v2.0" role="{role}">
                <What>
                    <Param name="AlertType" value="{alert_type}"/>
                    <Param name="GraceID" value="S230518h"/>
                    {extra}
                </What>
            </voe:VOEvent>"#
        )
    }

    #[test]
    fn parses_role_and_fields() {
        let doc = xml("observation", "Preliminary", r#"<Param name="Terrestrial" value="0.01"/><Param name="FAR" value="1e-10"/>"#);
        let alert = parse_lvc_xml(&doc).unwrap();
        assert_eq!(alert.role, "observation");
        assert_eq!(alert.grace_id, "S230518h");
        assert!((alert.terrestrial - 0.01).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_observation_role() {
        let doc = xml("test", "Preliminary", "");
        let alert = parse_lvc_xml(&doc).unwrap();
        let grid = sample_grid();
        let outcome = process_lvc_alert(&alert, &[], &grid, Utc::now());
        assert!(matches!(outcome, LvcOutcome::Rejected(_)));
    }

    #[test]
    fn retraction_produces_immediately_expired_empty_schedule() {
        let doc = xml("observation", "Retraction", "");
        let alert = parse_lvc_xml(&doc).unwrap();
        let grid = sample_grid();
        let now = Utc::now();
        match process_lvc_alert(&alert, &[], &grid, now) {
            LvcOutcome::Retraction(schedule) => {
                assert!(schedule.targets.is_empty());
                assert_eq!(schedule.priority, 0);
                assert!(schedule.is_expired(now));
            }
            _ => panic!("expected retraction"),
        }
    }

    #[test]
    fn high_terrestrial_is_rejected() {
        let doc = xml("observation", "Preliminary", r#"<Param name="Terrestrial" value="0.95"/>"#);
        let alert = parse_lvc_xml(&doc).unwrap();
        let grid = sample_grid();
        let outcome = process_lvc_alert(&alert, &[], &grid, Utc::now());
        assert!(matches!(outcome, LvcOutcome::Rejected(_)));
    }

    #[test]
    fn tiling_picks_smallest_prefix_reaching_target() {
        let grid = sample_grid();
        let pixels = vec![
            SkymapPixel { ra_deg: 0.0, dec_deg: 0.0, probdensity: 0.5, area_sr: 1.0 },
            SkymapPixel { ra_deg: 10.0, dec_deg: 0.0, probdensity: 0.3, area_sr: 1.0 },
            SkymapPixel { ra_deg: 20.0, dec_deg: 0.0, probdensity: 0.1, area_sr: 1.0 },
            SkymapPixel { ra_deg: 30.0, dec_deg: 0.0, probdensity: 0.01, area_sr: 1.0 },
        ];
        let tiled = tile_credible_region(&pixels, &grid, 0.9);
        // 0.5 + 0.3 = 0.8; the 0.1 pixel that would cross 0.9 is excluded.
        let total: f64 = tiled.iter().map(|(_, p)| p).sum();
        assert!((total - 0.8).abs() < 1e-9);
    }

    #[test]
    fn bbh_candidate_tightens_cutoff_and_rejects_broad_localization() {
        let grid = sample_grid();
        // 36 distinct fields, each pixel contributing 0.05 -> 18 fields
        // needed to reach the 0.9 cumulative target, well above the
        // BBH-tightened cutoff of 10.
        let pixels: Vec<SkymapPixel> = (0..36)
            .map(|i| SkymapPixel {
                ra_deg: (i as f64) * 10.0,
                dec_deg: 0.0,
                probdensity: 0.05,
                area_sr: 1.0,
            })
            .collect();
        let doc = xml("observation", "Preliminary", r#"<Param name="BBH" value="0.95"/>"#);
        let alert = parse_lvc_xml(&doc).unwrap();
        let outcome = process_lvc_alert(&alert, &pixels, &grid, Utc::now());
        assert!(matches!(outcome, LvcOutcome::Rejected(_)));
    }
}
