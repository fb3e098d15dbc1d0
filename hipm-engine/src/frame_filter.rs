//! Bad-frame handling ahead of 3D aggregation
//!
//! Frames are excluded from a sweep when they fall outside the densest run
//! of measured frames, or when their landmarks fail a plausibility check.
//! Excluded frames keep their index but lose their landmarks and metrics, so
//! aggregation sees them as empty.

use tracing::debug;

use crate::geometry::line_angle;
use crate::landmarks::LandmarksUs;
use crate::metrics::FrameMetrics;

/// Plausibility thresholds for one ultrasound frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFilter {
    /// Alpha Angle range, degrees
    pub min_alpha: f64,
    pub max_alpha: f64,
    /// Largest tilt of the Left–Right baseline against the image x axis, degrees
    pub max_baseline_tilt: f64,
    /// Smallest Apex–Right distance, pixels
    pub min_apex_right_distance: f64,
}

impl Default for FrameFilter {
    fn default() -> Self {
        Self {
            min_alpha: 20.0,
            max_alpha: 100.0,
            max_baseline_tilt: 10.0,
            min_apex_right_distance: 30.0,
        }
    }
}

/// Why a frame was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Outside the densest run of measured frames
    Outlier,
    AlphaOutOfRange,
    BaselineTilted,
    ApexRightTooClose,
}

/// Sweep with bad frames blanked out
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredSweep {
    pub sweep: Vec<LandmarksUs>,
    pub metrics: Vec<FrameMetrics>,
    /// Indices of blanked frames, ascending
    pub excluded: Vec<usize>,
}

impl FrameFilter {
    /// Blank every frame that is an outlier or fails a check
    ///
    /// Frames without any metric are left alone: they are already empty.
    pub fn apply(&self, sweep: &[LandmarksUs], metrics: &[FrameMetrics]) -> FilteredSweep {
        let keep = densest_marked_run(metrics);
        let mut filtered = FilteredSweep {
            sweep: sweep.to_vec(),
            metrics: metrics.to_vec(),
            excluded: Vec::new(),
        };

        for (i, m) in metrics.iter().enumerate() {
            if !m.has_any() {
                continue;
            }
            let rejection = if keep[i] {
                sweep.get(i).and_then(|lm| self.check(lm, m))
            } else {
                Some(Rejection::Outlier)
            };
            if let Some(reason) = rejection {
                debug!(frame = i, reason = ?reason, "Frame excluded from aggregation");
                filtered.metrics[i] = FrameMetrics::default();
                if let Some(lm) = filtered.sweep.get_mut(i) {
                    *lm = LandmarksUs::default();
                }
                filtered.excluded.push(i);
            }
        }
        filtered
    }

    /// First failed check of one frame
    pub fn check(&self, landmarks: &LandmarksUs, metrics: &FrameMetrics) -> Option<Rejection> {
        if metrics
            .alpha
            .is_some_and(|a| a < self.min_alpha || a > self.max_alpha)
        {
            return Some(Rejection::AlphaOutOfRange);
        }
        if let (Some(left), Some(right)) = (landmarks.left, landmarks.right) {
            let axis = left.translate(1.0, 0.0);
            if line_angle(&left, &right, &left, &axis).is_some_and(|t| t > self.max_baseline_tilt) {
                return Some(Rejection::BaselineTilted);
            }
        }
        match (landmarks.apex, landmarks.right) {
            (Some(apex), Some(right)) if apex.distance(&right) >= self.min_apex_right_distance => None,
            _ => Some(Rejection::ApexRightTooClose),
        }
    }
}

/// Marks the measured frames inside the window that holds the most of them
///
/// The window is as long as the number of measured frames; the earliest
/// best window wins.
pub fn densest_marked_run(metrics: &[FrameMetrics]) -> Vec<bool> {
    let marked: Vec<bool> = metrics.iter().map(FrameMetrics::has_any).collect();
    let width = marked.iter().filter(|&&m| m).count();
    let mut keep = vec![false; marked.len()];
    if width == 0 {
        return keep;
    }

    let mut count = marked[..width].iter().filter(|&&m| m).count();
    let (mut best, mut best_start) = (count, 0);
    for start in 1..=marked.len() - width {
        if marked[start - 1] {
            count -= 1;
        }
        if marked[start + width - 1] {
            count += 1;
        }
        if count > best {
            best = count;
            best_start = start;
        }
    }

    for i in best_start..best_start + width {
        keep[i] = marked[i];
    }
    keep
}
