//! 2D metric engine
//!
//! Pure functions from one frame's landmarks to its measurements. A metric
//! whose landmarks are missing is `None`; no default value is ever
//! substituted.

mod us;
mod xray;

pub use us::{alpha_angle, compute_us_metrics, coverage, curvature};
pub use xray::{acetabular_index, compute_xray_metrics, wiberg_angle};

use serde::{Deserialize, Serialize};

use crate::landmarks::Landmarks;

/// Measurements of one frame
///
/// Absent values serialize as `null` so the schema never changes shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    /// Degrees, [0, 180)
    pub alpha: Option<f64>,
    /// Ratio, [0, 1]
    pub coverage: Option<f64>,
    /// Dimensionless, >= 0
    pub curvature: Option<f64>,
    /// Degrees, X-ray only
    pub acetabular_index_left: Option<f64>,
    /// Degrees, X-ray only
    pub acetabular_index_right: Option<f64>,
    /// Centre-edge angle in degrees, X-ray only
    #[serde(default)]
    pub wiberg_left: Option<f64>,
    #[serde(default)]
    pub wiberg_right: Option<f64>,
}

impl FrameMetrics {
    /// At least one metric is present
    pub fn has_any(&self) -> bool {
        self.alpha.is_some()
            || self.coverage.is_some()
            || self.curvature.is_some()
            || self.acetabular_index_left.is_some()
            || self.acetabular_index_right.is_some()
            || self.wiberg_left.is_some()
            || self.wiberg_right.is_some()
    }
}

/// Compute the metrics of whichever modality `landmarks` belongs to
pub fn compute_metrics(landmarks: &Landmarks) -> FrameMetrics {
    match landmarks {
        Landmarks::Ultrasound(l) => compute_us_metrics(l),
        Landmarks::Xray(l) => compute_xray_metrics(l),
    }
}
