//! Target clustering and splitting (C3).
//!
//! `separate_evenly` is a plain round-robin split. `separate_by_cluster`
//! lifts targets onto the unit sphere using the *direct* convention
//! (`x = cos(dec)cos(ra), y = cos(dec)sin(ra), z = sin(dec)`) — deliberately
//! different from the grid convention in [`crate::astro`] used by the
//! tessellation ball-tree, since clustering only needs relative angular
//! distance and must never be checked against the prebuilt grid.

use pathfinding::prelude::{kuhn_munkres_min, Matrix};

use crate::model::{Target, TargetSet};

/// Splits `targets` into `n` sets by round-robin index assignment
/// (`i -> i mod n`). Degrades gracefully if a telescope drops out, since
/// coverage loss is spread evenly rather than concentrated.
pub fn separate_evenly(targets: &TargetSet, n: usize) -> Vec<TargetSet> {
    assert!(n > 0, "separate_evenly requires at least one partition");
    let mut out = vec![Vec::new(); n];
    for (i, target) in targets.iter().enumerate() {
        out[i % n].push(target.clone());
    }
    out
}

fn to_unit_sphere(target: &Target) -> [f64; 3] {
    let ra = target.ra_deg.to_radians();
    let dec = target.dec_deg.to_radians();
    [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()]
}

fn squared_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    (0..3).map(|i| (a[i] - b[i]).powi(2)).sum()
}

fn centroid(points: &[[f64; 3]]) -> [f64; 3] {
    let mut sum = [0.0; 3];
    for p in points {
        for i in 0..3 {
            sum[i] += p[i];
        }
    }
    let len = points.len().max(1) as f64;
    [sum[0] / len, sum[1] / len, sum[2] / len]
}

/// Deterministic farthest-point sampling for initial k-means centers.
fn initial_centers(points: &[[f64; 3]], k: usize) -> Vec<[f64; 3]> {
    let mut centers = vec![points[0]];
    while centers.len() < k {
        let next = points
            .iter()
            .max_by(|a, b| {
                let da = centers.iter().map(|c| squared_distance(**a, *c)).fold(f64::MAX, f64::min);
                let db = centers.iter().map(|c| squared_distance(**b, *c)).fold(f64::MAX, f64::min);
                da.partial_cmp(&db).unwrap()
            })
            .copied()
            .unwrap();
        centers.push(next);
    }
    centers
}

fn lloyd_kmeans(points: &[[f64; 3]], k: usize, iterations: usize) -> Vec<[f64; 3]> {
    let mut centers = initial_centers(points, k);
    for _ in 0..iterations {
        let mut buckets: Vec<Vec<[f64; 3]>> = vec![Vec::new(); k];
        for &p in points {
            let nearest = (0..k)
                .min_by(|&a, &b| {
                    squared_distance(p, centers[a])
                        .partial_cmp(&squared_distance(p, centers[b]))
                        .unwrap()
                })
                .unwrap();
            buckets[nearest].push(p);
        }
        for (i, bucket) in buckets.iter().enumerate() {
            if !bucket.is_empty() {
                centers[i] = centroid(bucket);
            }
        }
    }
    centers
}

/// Splits `targets` into `n` near-equal-size spatial clusters via k-means
/// followed by a rectangular linear-sum assignment against `n * ceil(|T|/n)`
/// virtual center-slots, so no cluster differs in size by more than one.
pub fn separate_by_cluster(targets: &TargetSet, n: usize) -> Vec<TargetSet> {
    assert!(n > 0, "separate_by_cluster requires at least one partition");
    if targets.is_empty() {
        return vec![Vec::new(); n];
    }
    if n == 1 {
        return vec![targets.clone()];
    }

    let points: Vec<[f64; 3]> = targets.iter().map(to_unit_sphere).collect();
    let centers = lloyd_kmeans(&points, n, 25);

    let ceil_size = points.len().div_ceil(n);
    let slot_count = n * ceil_size;

    // Cost matrix must be square for kuhn_munkres_min; pad with zero-cost
    // dummy targets so every virtual slot has a row to compete for.
    let mut weights = Vec::with_capacity(slot_count);
    for point in &points {
        let row: Vec<i64> = (0..slot_count)
            .map(|slot| {
                let center = centers[slot / ceil_size];
                (squared_distance(*point, center) * 1_000_000.0).round() as i64
            })
            .collect();
        weights.push(row);
    }
    for _ in points.len()..slot_count {
        weights.push(vec![0; slot_count]);
    }

    let matrix = Matrix::from_rows(weights).expect("square cost matrix");
    let (_, assignment) = kuhn_munkres_min(&matrix);

    let mut out = vec![Vec::new(); n];
    for (point_idx, target) in targets.iter().enumerate() {
        let slot = assignment[point_idx];
        out[slot / ceil_size].push(target.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, ra: f64, dec: f64) -> Target {
        Target::new(name, ra, dec)
    }

    #[test]
    fn separate_evenly_round_robins() {
        let targets = vec![target("a", 0.0, 0.0), target("b", 1.0, 0.0), target("c", 2.0, 0.0)];
        let split = separate_evenly(&targets, 2);
        assert_eq!(split[0].len(), 2);
        assert_eq!(split[1].len(), 1);
    }

    #[test]
    fn separate_evenly_identity_for_one_partition() {
        let targets = vec![target("a", 0.0, 0.0), target("b", 1.0, 0.0)];
        let split = separate_evenly(&targets, 1);
        assert_eq!(split, vec![targets]);
    }

    #[test]
    fn separate_by_cluster_identity_for_one_partition() {
        let targets = vec![target("a", 0.0, 0.0), target("b", 1.0, 0.0)];
        let split = separate_by_cluster(&targets, 1);
        assert_eq!(split, vec![targets]);
    }

    #[test]
    fn separate_by_cluster_preserves_all_targets_with_sizes_within_one() {
        let targets: Vec<Target> = (0..9)
            .map(|i| target(&format!("t{i}"), (i as f64) * 10.0, 0.0))
            .collect();
        let split = separate_by_cluster(&targets, 2);
        let total: usize = split.iter().map(Vec::len).sum();
        assert_eq!(total, 9);
        let sizes: Vec<usize> = split.iter().map(Vec::len).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn separate_by_cluster_groups_spatially_close_targets_together() {
        // Two well-separated clumps of 4 targets each.
        let mut targets = Vec::new();
        for i in 0..4 {
            targets.push(target(&format!("near{i}"), i as f64, 0.0));
        }
        for i in 0..4 {
            targets.push(target(&format!("far{i}"), 170.0 + i as f64, 0.0));
        }
        let split = separate_by_cluster(&targets, 2);
        let names_in_cluster: Vec<Vec<&str>> = split
            .iter()
            .map(|set| set.iter().map(|t| t.name.as_str()).collect())
            .collect();
        // Each cluster should be internally homogeneous (all "near" or all "far").
        for cluster in &names_in_cluster {
            let all_near = cluster.iter().all(|n| n.starts_with("near"));
            let all_far = cluster.iter().all(|n| n.starts_with("far"));
            assert!(all_near || all_far);
        }
    }
}
