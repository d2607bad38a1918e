//! Outlier removal for dense point grids.
//!
//! Each point is scored by the mean absolute depth step to its valid
//! 4-neighbours. Points whose score lies more than `d` standard deviations
//! from the global mean score are dropped. Isolated points have no score and
//! are dropped as well.

use super::{is_finite_point, DenseCloud};

/// Points before and after one filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterReport {
    pub before: usize,
    pub after: usize,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }
}

/// Single in-place pass over `cloud`.
pub fn filter_outliers(cloud: &mut DenseCloud, d: f32) -> FilterReport {
    let before = cloud.valid_count();
    let width = cloud.width as usize;
    let height = cloud.height as usize;
    let valid: Vec<bool> = cloud.points.iter().map(is_finite_point).collect();

    let mut sums = vec![0.0f32; valid.len()];
    let mut counts = vec![0u32; valid.len()];
    let mut link = |a: usize, b: usize| {
        if valid[a] && valid[b] {
            let step = (cloud.points[a][2] - cloud.points[b][2]).abs();
            sums[a] += step;
            sums[b] += step;
            counts[a] += 1;
            counts[b] += 1;
        }
    };
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if x + 1 < width {
                link(idx, idx + 1);
            }
            if y + 1 < height {
                link(idx, idx + width);
            }
        }
    }

    // Local mean depth step of every point that has at least one neighbour.
    let scores: Vec<Option<f32>> = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| (count > 0).then(|| sum / count as f32))
        .collect();

    let samples: Vec<f32> = scores.iter().flatten().copied().collect();
    if samples.len() < 2 {
        log::warn!("Point cloud has {} connected point(s), discarding it", samples.len());
        cloud.invalidate_all();
        return FilterReport { before, after: 0 };
    }

    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let variance = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    for (point, score) in cloud.points.iter_mut().zip(&scores) {
        let keep = match score {
            None => false,
            // Uniform surface: nothing deviates.
            Some(_) if std == 0.0 => true,
            Some(s) => ((*s as f64 - mean) / std).abs() <= d as f64,
        };
        if !keep {
            *point = super::INVALID_POINT;
        }
    }

    let report = FilterReport {
        before,
        after: cloud.valid_count(),
    };
    log::debug!(
        "Filter removed {} of {} points (mean step {:.4}, std {:.4})",
        report.removed(),
        report.before,
        mean,
        std
    );
    report
}
