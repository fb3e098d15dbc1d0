//! 3D aggregation over an ultrasound sweep
//!
//! Selects the Graf frame, averages the metrics of its window and of the
//! two sweep ends (posterior at index 0, anterior at the last index), and
//! derives ACA and Centering Ratio.
//!
//! Graf frame policy: the frame with the highest Coverage among frames with
//! a valid Alpha Angle (earliest wins a tie). Sweeps with no Coverage at all
//! fall back to the highest Alpha Angle.

use serde::{Deserialize, Serialize};

use crate::config::{AcaWeights, AnalysisConfig};
use crate::geometry::EPSILON;
use crate::landmarks::LandmarksUs;
use crate::metrics::FrameMetrics;

pub const NO_GRAF_FRAME: &str = "No Perfect Grafs Frames found.";
pub const NO_POSTERIOR: &str = "No Posterior values recorded.";
pub const NO_ANTERIOR: &str = "No Anterior values recorded.";

/// Aggregation tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationParams {
    /// Graf window half-width as a fraction of sweep length
    pub window_fraction: f64,
    pub aca_weights: AcaWeights,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            window_fraction: 0.05,
            aca_weights: AcaWeights::default(),
        }
    }
}

impl From<&AnalysisConfig> for AggregationParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            window_fraction: config.graf_window_fraction,
            aca_weights: config.aca_weights,
        }
    }
}

/// Averaged metrics of one plane (a run of frames)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneMetrics {
    pub alpha: Option<f64>,
    pub coverage: Option<f64>,
    pub curvature: Option<f64>,
    /// Frames in the plane, contributing or not
    pub frames: usize,
}

/// One metric broken down by plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric3D {
    pub post: Option<f64>,
    pub graf: Option<f64>,
    pub ant: Option<f64>,
    /// Mean of the present planes
    pub full: Option<f64>,
}

impl Metric3D {
    pub fn new(post: Option<f64>, graf: Option<f64>, ant: Option<f64>) -> Self {
        let (full, _) = mean([post, graf, ant].into_iter());
        Self {
            post,
            graf,
            ant,
            full,
        }
    }
}

/// Sweep-level metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub total_frames: usize,
    pub graf_frame: Option<usize>,
    pub window_half_width: usize,
    pub window_start: Option<usize>,
    pub window_end: Option<usize>,
    pub posterior_frame: Option<usize>,
    pub anterior_frame: Option<usize>,
    pub graf: PlaneMetrics,
    pub posterior: PlaneMetrics,
    pub anterior: PlaneMetrics,
    pub aca: Option<f64>,
    pub alpha_3d: Metric3D,
    pub coverage_3d: Metric3D,
    pub curvature_3d: Metric3D,
    /// Not clamped: values outside [0, 1] indicate detection trouble
    pub centering_ratio: Option<f64>,
    /// Some window frame lacked a metric the others had
    pub partial: bool,
    pub recorded_errors: Vec<String>,
    /// No Graf frame could be selected
    pub critical: bool,
    /// Frames blanked by the bad-frame filter before aggregation
    #[serde(default)]
    pub excluded_frames: Vec<usize>,
}

/// Aggregate a sweep of per-frame landmarks and metrics
///
/// `metrics[i]` belongs to frame `i`; `sweep` is used for the femoral head
/// position only and may be shorter.
pub fn aggregate(sweep: &[LandmarksUs], metrics: &[FrameMetrics], params: &AggregationParams) -> VolumeMetrics {
    let n = metrics.len();
    let half = (params.window_fraction * n as f64).round() as usize;

    let mut volume = VolumeMetrics {
        total_frames: n,
        window_half_width: half,
        centering_ratio: centering_ratio(sweep),
        ..Default::default()
    };

    let Some(graf) = select_graf_frame(metrics) else {
        volume.recorded_errors.push(NO_GRAF_FRAME.to_string());
        volume.critical = true;
        return volume;
    };

    let start = graf.saturating_sub(half);
    let end = (graf + half).min(n - 1);
    volume.graf_frame = Some(graf);
    volume.window_start = Some(start);
    volume.window_end = Some(end);
    volume.graf = plane(&metrics[start..=end]);
    volume.partial = is_partial(&metrics[start..=end]);

    // Posterior: first valid frame from index 0, before the window
    if let Some(p) = (0..start).find(|&i| metrics[i].alpha.is_some()) {
        let last = (p + 2 * half).min(start - 1);
        volume.posterior_frame = Some(p);
        volume.posterior = plane(&metrics[p..=last]);
    } else {
        volume.recorded_errors.push(NO_POSTERIOR.to_string());
    }

    // Anterior: first valid frame from the last index, after the window
    if let Some(a) = (end + 1..n).rev().find(|&i| metrics[i].alpha.is_some()) {
        let first = a.saturating_sub(2 * half).max(end + 1);
        volume.anterior_frame = Some(a);
        volume.anterior = plane(&metrics[first..=a]);
    } else {
        volume.recorded_errors.push(NO_ANTERIOR.to_string());
    }

    volume.aca = aca(&volume, &params.aca_weights);
    volume.alpha_3d = Metric3D::new(volume.posterior.alpha, volume.graf.alpha, volume.anterior.alpha);
    volume.coverage_3d = Metric3D::new(
        volume.posterior.coverage,
        volume.graf.coverage,
        volume.anterior.coverage,
    );
    volume.curvature_3d = Metric3D::new(
        volume.posterior.curvature,
        volume.graf.curvature,
        volume.anterior.curvature,
    );

    volume
}

/// Index of the Graf frame, if any frame has a valid Alpha Angle
pub fn select_graf_frame(metrics: &[FrameMetrics]) -> Option<usize> {
    let mut by_coverage: Option<(usize, f64)> = None;
    let mut by_alpha: Option<(usize, f64)> = None;

    for (i, m) in metrics.iter().enumerate() {
        let Some(alpha) = m.alpha else {
            continue;
        };
        if by_alpha.map_or(true, |(_, best)| alpha > best) {
            by_alpha = Some((i, alpha));
        }
        if let Some(cov) = m.coverage {
            if by_coverage.map_or(true, |(_, best)| cov > best) {
                by_coverage = Some((i, cov));
            }
        }
    }

    by_coverage.or(by_alpha).map(|(i, _)| i)
}

/// ACA: weighted mean of the plane Alpha Angles
///
/// Weights are renormalised over the planes that are present. Absent when
/// the Graf window has no Alpha Angle.
fn aca(volume: &VolumeMetrics, weights: &AcaWeights) -> Option<f64> {
    let graf = volume.graf.alpha?;
    let parts: Vec<(f64, f64)> = [
        (weights.graf, Some(graf)),
        (weights.anterior, volume.anterior.alpha),
        (weights.posterior, volume.posterior.alpha),
    ]
    .into_iter()
    .filter_map(|(w, v)| v.filter(|_| w > 0.0).map(|v| (w, v)))
    .collect();

    if parts.len() == 1 {
        return Some(graf);
    }
    let total: f64 = parts.iter().map(|(w, _)| w).sum();
    Some(parts.iter().map(|(w, v)| w * v).sum::<f64>() / total)
}

/// First and last frame where the acetabulum (Left landmark) is present
pub fn acetabular_extent(sweep: &[LandmarksUs]) -> Option<(usize, usize)> {
    let first = sweep.iter().position(|l| l.left.is_some())?;
    let last = sweep.iter().rposition(|l| l.left.is_some())?;
    Some((first, last))
}

/// Femoral head centre along the sweep, as a diameter-weighted frame index
pub fn femoral_head_centre(sweep: &[LandmarksUs]) -> Option<f64> {
    let (weighted, total) = sweep
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.femoral_head_diameter().map(|d| (i, d)))
        .filter(|(_, d)| *d > EPSILON)
        .fold((0.0, 0.0), |(w, t), (i, d)| (w + i as f64 * d, t + d));
    if total <= EPSILON {
        return None;
    }
    Some(weighted / total)
}

/// Position of the femoral head centre within the acetabular extent
///
/// `|last − centre| / (last − first)`. Passed through unclamped.
pub fn centering_ratio(sweep: &[LandmarksUs]) -> Option<f64> {
    let (first, last) = acetabular_extent(sweep)?;
    if last == first {
        return None;
    }
    let centre = femoral_head_centre(sweep)?;
    Some((last as f64 - centre).abs() / (last - first) as f64)
}

fn plane(frames: &[FrameMetrics]) -> PlaneMetrics {
    PlaneMetrics {
        alpha: mean(frames.iter().map(|m| m.alpha)).0,
        coverage: mean(frames.iter().map(|m| m.coverage)).0,
        curvature: mean(frames.iter().map(|m| m.curvature)).0,
        frames: frames.len(),
    }
}

fn is_partial(frames: &[FrameMetrics]) -> bool {
    let counts = [
        mean(frames.iter().map(|m| m.alpha)).1,
        mean(frames.iter().map(|m| m.coverage)).1,
        mean(frames.iter().map(|m| m.curvature)).1,
    ];
    counts.iter().any(|&c| c > 0 && c < frames.len())
}

/// Mean of the present values and how many there were
fn mean(values: impl Iterator<Item = Option<f64>>) -> (Option<f64>, usize) {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        (None, 0)
    } else {
        (Some(sum / count as f64), count)
    }
}
