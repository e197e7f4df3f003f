//! Split ChESS corner orientations into the two chessboard axis families.
//!
//! Angles live on the circle of period π. A smoothed histogram seeds two
//! centers, then a few rounds of circular 2-means refine them; corners far
//! from both centers are left unlabeled.

use std::f32::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

use crate::Corner;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationClusteringParams {
    /// Histogram bins on [0, π).
    pub num_bins: usize,
    pub max_iters: usize,
    /// Minimal separation between the two seed peaks (radians).
    pub peak_min_separation: f32,
    /// Corners farther than this from both centers are outliers (radians).
    pub outlier_threshold: f32,
    /// Peaks lighter than this fraction of the total weight are ignored.
    pub min_peak_weight_fraction: f32,
    /// Weight samples by corner strength instead of counting them.
    pub use_weights: bool,
}

impl Default for OrientationClusteringParams {
    fn default() -> Self {
        Self {
            num_bins: 90,
            max_iters: 10,
            peak_min_separation: 10f32.to_radians(),
            outlier_threshold: 30f32.to_radians(),
            min_peak_weight_fraction: 0.05,
            use_weights: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrientationClusteringResult {
    /// Cluster centers in [0, π).
    pub centers: [f32; 2],
    /// Per input corner: cluster 0, 1 or `None` for outliers.
    pub labels: Vec<Option<usize>>,
    pub cluster_weights: [f32; 2],
}

/// Cluster corner orientations into two dominant directions.
///
/// Returns `None` when fewer than two well separated modes exist.
pub fn cluster_orientations(
    corners: &[Corner],
    params: &OrientationClusteringParams,
) -> Option<OrientationClusteringResult> {
    if corners.is_empty() || params.num_bins < 4 {
        return None;
    }

    let weight = |c: &Corner| {
        if params.use_weights {
            c.strength.max(0.0)
        } else {
            1.0
        }
    };
    let angles: Vec<f32> = corners.iter().map(|c| wrap_pi(c.orientation)).collect();

    let mut hist = vec![0.0f32; params.num_bins];
    for (c, &t) in corners.iter().zip(&angles) {
        hist[angle_to_bin(t, params.num_bins)] += weight(c);
    }
    let total: f32 = hist.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let smoothed = smooth_circular(&hist);
    let min_peak = total * params.min_peak_weight_fraction;
    let mut peaks: Vec<(usize, f32)> = local_maxima(&smoothed)
        .into_iter()
        .filter(|&(_, v)| v >= min_peak)
        .collect();
    peaks.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (&(first, _), rest) = peaks.split_first()?;
    let phi1 = bin_center(first, params.num_bins);
    let phi2 = rest
        .iter()
        .map(|&(bin, _)| bin_center(bin, params.num_bins))
        .find(|&cand| angular_dist_pi(phi1, cand) >= params.peak_min_separation)?;

    let mut centers = [phi1, phi2];
    let mut labels: Vec<Option<usize>> = vec![None; corners.len()];

    for _ in 0..params.max_iters {
        let mut changed = false;
        for (label, &t) in labels.iter_mut().zip(&angles) {
            let d = [angular_dist_pi(t, centers[0]), angular_dist_pi(t, centers[1])];
            let best = usize::from(d[1] < d[0]);
            let new = (d[best] <= params.outlier_threshold).then_some(best);
            changed |= *label != new;
            *label = new;
        }

        // Circular mean on the doubled angle keeps the period-π wrap intact.
        let mut acc = [(0.0f32, 0.0f32); 2];
        for ((c, &t), label) in corners.iter().zip(&angles).zip(&labels) {
            if let Some(k) = *label {
                let w = weight(c);
                acc[k].0 += w * (2.0 * t).cos();
                acc[k].1 += w * (2.0 * t).sin();
            }
        }
        for (center, (cx, cy)) in centers.iter_mut().zip(acc) {
            if cx != 0.0 || cy != 0.0 {
                *center = wrap_pi(0.5 * cy.atan2(cx));
            }
        }

        if !changed {
            break;
        }
    }

    let mut cluster_weights = [0.0f32; 2];
    for (c, label) in corners.iter().zip(&labels) {
        if let Some(k) = *label {
            cluster_weights[k] += weight(c);
        }
    }

    Some(OrientationClusteringResult {
        centers,
        labels,
        cluster_weights,
    })
}

fn wrap_pi(theta: f32) -> f32 {
    let t = theta.rem_euclid(PI);
    if t >= PI {
        0.0
    } else {
        t
    }
}

/// Distance on the period-π circle, in [0, π/2].
fn angular_dist_pi(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(PI);
    if d > FRAC_PI_2 {
        PI - d
    } else {
        d
    }
}

fn angle_to_bin(theta: f32, num_bins: usize) -> usize {
    ((theta / PI * num_bins as f32) as usize).min(num_bins - 1)
}

fn bin_center(bin: usize, num_bins: usize) -> f32 {
    (bin as f32 + 0.5) * PI / num_bins as f32
}

/// Circular convolution with the binomial kernel [1 4 6 4 1] / 16.
fn smooth_circular(hist: &[f32]) -> Vec<f32> {
    const K: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];
    let n = hist.len() as isize;
    (0..n)
        .map(|i| {
            K.iter()
                .enumerate()
                .map(|(k, w)| w * hist[(i + k as isize - 2).rem_euclid(n) as usize])
                .sum::<f32>()
                / 16.0
        })
        .collect()
}

fn local_maxima(hist: &[f32]) -> Vec<(usize, f32)> {
    let n = hist.len();
    (0..n)
        .filter(|&i| {
            let v = hist[i];
            v > 0.0 && v >= hist[(i + n - 1) % n] && v >= hist[(i + 1) % n]
        })
        .map(|i| (i, hist[i]))
        .collect()
}
