//! Fixed RASA11 tessellation grid: loads the field-center catalogue and
//! answers nearest-neighbor ball queries against it.

use std::path::Path;

use kiddo::{KdTree, SquaredEuclidean};

use crate::astro::spherical_to_cartesian_grid;
use crate::error::{Result, SchedulerError};

/// One field center in the tessellation catalogue.
#[derive(Debug, Clone, Copy)]
pub struct GridField {
    pub ra_rad: f64,
    pub dec_rad: f64,
}

/// A nearest-neighbor result: the grid field index and its chord distance.
#[derive(Debug, Clone, Copy)]
pub struct GridHit {
    pub index: usize,
    pub distance: f64,
}

/// Fixed sky grid loaded from the `.tess` catalogue file, indexed for
/// radius queries over its Cartesian unit-sphere coordinates.
pub struct TessellationGrid {
    fields: Vec<GridField>,
    tree: KdTree<f64, 3>,
}

impl std::fmt::Debug for TessellationGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TessellationGrid")
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl TessellationGrid {
    /// Loads a whitespace-separated `.tess` file; columns 1 and 2 (zero-based)
    /// hold `(ra_rad, dec_rad)`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut fields = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let cols: Vec<&str> = trimmed.split_whitespace().collect();
            if cols.len() < 3 {
                return Err(SchedulerError::CorruptSnapshot(format!(
                    "tessellation file line {lineno} has fewer than 3 columns"
                )));
            }
            let ra_rad: f64 = cols[1].parse().map_err(|_| {
                SchedulerError::CorruptSnapshot(format!(
                    "tessellation file line {lineno} has non-numeric ra"
                ))
            })?;
            let dec_rad: f64 = cols[2].parse().map_err(|_| {
                SchedulerError::CorruptSnapshot(format!(
                    "tessellation file line {lineno} has non-numeric dec"
                ))
            })?;
            fields.push(GridField { ra_rad, dec_rad });
        }
        Ok(Self::from_fields(fields))
    }

    pub fn from_fields(fields: Vec<GridField>) -> Self {
        let mut tree: KdTree<f64, 3> = KdTree::new();
        for (i, field) in fields.iter().enumerate() {
            let p = spherical_to_cartesian_grid(field.ra_rad, field.dec_rad);
            tree.add(&p, i as u64);
        }
        Self { fields, tree }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> GridField {
        self.fields[index]
    }

    /// Returns every grid field whose Cartesian distance to `center_xyz` is
    /// at most `chord_radius`, sorted by ascending distance.
    pub fn query_radius(&self, center_xyz: [f64; 3], chord_radius: f64) -> Vec<GridHit> {
        let radius_sq = chord_radius * chord_radius;
        self.tree
            .within::<SquaredEuclidean>(&center_xyz, radius_sq)
            .into_iter()
            .map(|neighbour| GridHit {
                index: neighbour.item as usize,
                distance: neighbour.distance.sqrt(),
            })
            .collect()
    }
}
