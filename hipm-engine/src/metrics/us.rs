use crate::geometry::{perpendicular_distance, projection_parameter, ray_angle, EPSILON};
use crate::landmarks::LandmarksUs;

use super::FrameMetrics;

/// Ultrasound frame metrics
pub fn compute_us_metrics(landmarks: &LandmarksUs) -> FrameMetrics {
    FrameMetrics {
        alpha: alpha_angle(landmarks),
        coverage: coverage(landmarks),
        curvature: curvature(landmarks),
        ..Default::default()
    }
}

/// Angle at Left between the baseline (Left–Right) and the roof line
/// (Left–Apex), in degrees within [0, 180)
pub fn alpha_angle(landmarks: &LandmarksUs) -> Option<f64> {
    let (left, apex, right) = (landmarks.left?, landmarks.apex?, landmarks.right?);
    let angle = ray_angle(&left, &right, &apex)?;
    Some(angle % 180.0)
}

/// Share of the femoral head diameter covered by the bony roof, [0, 1]
///
/// Measured along the diameter from `point_D` toward `point_d`, up to where
/// the roof line crosses it.
pub fn coverage(landmarks: &LandmarksUs) -> Option<f64> {
    let (big, small, mid) = (
        landmarks.point_big_d?,
        landmarks.point_small_d?,
        landmarks.mid_coverage?,
    );
    let t = projection_parameter(&mid, &big, &small)?;
    Some(t.clamp(0.0, 1.0))
}

/// Mean deviation of the roof contour from the Left–Apex chord, divided by
/// the chord length
///
/// Absent when the roof contour has fewer than two points.
pub fn curvature(landmarks: &LandmarksUs) -> Option<f64> {
    let (left, apex) = (landmarks.left?, landmarks.apex?);
    let chord = left.distance(&apex);
    if chord < EPSILON || landmarks.roof.len() < 2 {
        return None;
    }

    let total: f64 = landmarks
        .roof
        .iter()
        .filter_map(|p| perpendicular_distance(p, &left, &apex))
        .sum();
    Some(total / landmarks.roof.len() as f64 / chord)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2D;

    fn base() -> LandmarksUs {
        LandmarksUs {
            left: Some(Point2D::new(0.0, 100.0)),
            apex: Some(Point2D::new(100.0, 150.0)),
            right: Some(Point2D::new(200.0, 100.0)),
            ..Default::default()
        }
    }

    fn shifted(l: &LandmarksUs, dx: f64, dy: f64) -> LandmarksUs {
        let t = |p: Option<Point2D>| p.map(|p| p.translate(dx, dy));
        LandmarksUs {
            left: t(l.left),
            apex: t(l.apex),
            right: t(l.right),
            point_big_d: t(l.point_big_d),
            point_small_d: t(l.point_small_d),
            mid_coverage: t(l.mid_coverage),
            roof: l.roof.iter().map(|p| p.translate(dx, dy)).collect(),
        }
    }

    #[test]
    fn test_alpha_angle_value() {
        let alpha = alpha_angle(&base()).unwrap();
        assert!((alpha - 0.5f64.atan().to_degrees()).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_translation_invariant() {
        let lm = base();
        let a = alpha_angle(&lm).unwrap();
        for (dx, dy) in [(37.5, -12.25), (-1000.0, 2500.0), (0.001, 0.0)] {
            let b = alpha_angle(&shifted(&lm, dx, dy)).unwrap();
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_alpha_range_for_steep_roof() {
        let mut lm = base();
        // Apex behind Left: obtuse angle, still below 180
        lm.apex = Some(Point2D::new(-50.0, 101.0));
        let alpha = alpha_angle(&lm).unwrap();
        assert!(alpha > 90.0 && alpha < 180.0);

        // Collinear behind Left folds to 0
        lm.apex = Some(Point2D::new(-50.0, 100.0));
        assert!(alpha_angle(&lm).unwrap() < 1e-9);
    }

    #[test]
    fn test_alpha_absent_when_apex_is_left() {
        let mut lm = base();
        lm.apex = lm.left;
        assert!(alpha_angle(&lm).is_none());
        lm.apex = None;
        assert!(alpha_angle(&lm).is_none());
    }

    #[test]
    fn test_coverage_partial_and_clamped() {
        let mut lm = base();
        lm.point_big_d = Some(Point2D::new(50.0, 200.0));
        lm.point_small_d = Some(Point2D::new(50.0, 100.0));

        lm.mid_coverage = Some(Point2D::new(50.0, 130.0));
        assert!((coverage(&lm).unwrap() - 0.7).abs() < 1e-9);

        // Roof line above the whole head
        lm.mid_coverage = Some(Point2D::new(50.0, 80.0));
        assert_eq!(coverage(&lm), Some(1.0));

        // Roof line below the whole head
        lm.mid_coverage = Some(Point2D::new(50.0, 220.0));
        assert_eq!(coverage(&lm), Some(0.0));
    }

    #[test]
    fn test_coverage_absent_without_head() {
        assert!(coverage(&base()).is_none());
    }

    #[test]
    fn test_curvature_straight_roof_is_zero() {
        let mut lm = base();
        lm.roof = vec![
            Point2D::new(0.0, 100.0),
            Point2D::new(50.0, 125.0),
            Point2D::new(100.0, 150.0),
        ];
        assert!(curvature(&lm).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_curvature_absent_without_roof_contour() {
        let mut lm = base();
        assert!(lm.roof.is_empty());
        assert!(curvature(&lm).is_none());

        lm.roof = vec![Point2D::new(0.0, 100.0)];
        assert!(curvature(&lm).is_none());

        // Deserialized landmarks without a roof key
        let json = serde_json::json!({
            "left": {"x": 0.0, "y": 100.0},
            "apex": {"x": 100.0, "y": 150.0},
            "right": {"x": 200.0, "y": 100.0},
            "point_D": null,
            "point_d": null,
            "mid_coverage": null
        });
        let lm: LandmarksUs = serde_json::from_value(json).unwrap();
        assert!(compute_us_metrics(&lm).curvature.is_none());
        assert!(compute_us_metrics(&lm).alpha.is_some());
    }

    #[test]
    fn test_curvature_bent_roof() {
        let mut lm = base();
        lm.left = Some(Point2D::new(0.0, 0.0));
        lm.apex = Some(Point2D::new(100.0, 0.0));
        lm.roof = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(50.0, 20.0),
            Point2D::new(100.0, 0.0),
        ];
        // mean deviation 20/3 over a chord of 100
        assert!((curvature(&lm).unwrap() - (20.0 / 3.0) / 100.0).abs() < 1e-12);
    }
}
