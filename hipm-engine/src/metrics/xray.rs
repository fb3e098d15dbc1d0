use crate::geometry::{line_angle, Point2D};
use crate::landmarks::LandmarksXray;

use super::FrameMetrics;

/// X-ray frame metrics
pub fn compute_xray_metrics(landmarks: &LandmarksXray) -> FrameMetrics {
    let (left, right) = acetabular_index(landmarks);
    let (wiberg_left, wiberg_right) = wiberg_angle(landmarks);
    FrameMetrics {
        acetabular_index_left: left,
        acetabular_index_right: right,
        wiberg_left,
        wiberg_right,
        ..Default::default()
    }
}

/// Acetabular Index per side, in degrees within [0, 90]
///
/// Angle between the H-line (through both `i` points) and the side's
/// `i`–`o` roof line. Each side is independent of the other side's roof.
pub fn acetabular_index(landmarks: &LandmarksXray) -> (Option<f64>, Option<f64>) {
    let (Some(h_left), Some(h_right)) = (landmarks.pel_l_i, landmarks.pel_r_i) else {
        return (None, None);
    };

    let left = landmarks
        .pel_l_o
        .and_then(|outer| line_angle(&h_left, &h_right, &h_left, &outer));
    let right = landmarks
        .pel_r_o
        .and_then(|outer| line_angle(&h_left, &h_right, &h_right, &outer));

    (left, right)
}

/// Wiberg centre-edge angle per side, in degrees within [0, 90]
///
/// Angle at the lateral edge `pel_*_o` between the perpendicular to the
/// H-line and the line to the femoral head centre. Needs the H-line, the
/// side's edge and its femoral head.
pub fn wiberg_angle(landmarks: &LandmarksXray) -> (Option<f64>, Option<f64>) {
    let (Some(h_left), Some(h_right)) = (landmarks.pel_l_i, landmarks.pel_r_i) else {
        return (None, None);
    };
    let (dx, dy) = (h_right.x - h_left.x, h_right.y - h_left.y);

    let side = |edge: Option<Point2D>, head: Option<Point2D>| {
        let (edge, head) = (edge?, head?);
        let vertical = edge.translate(-dy, dx);
        line_angle(&edge, &vertical, &edge, &head)
    };

    (
        side(landmarks.pel_l_o, landmarks.fem_l),
        side(landmarks.pel_r_o, landmarks.fem_r),
    )
}
