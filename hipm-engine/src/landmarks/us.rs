use serde::{Deserialize, Serialize};

use super::ExtractionOptions;
use crate::error::SegmentationError;
use crate::geometry::{centroid, line_intersection, signed_distance, Point2D, EPSILON};
use crate::segmentation::{largest_detection, validate_frame, HipLabel, SegmentationInstance};

/// Hip ultrasound landmarks of one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarksUs {
    pub left: Option<Point2D>,
    pub apex: Option<Point2D>,
    pub right: Option<Point2D>,
    /// Femoral head diameter end away from the bony roof
    #[serde(rename = "point_D")]
    pub point_big_d: Option<Point2D>,
    /// Femoral head diameter end toward the bony roof
    #[serde(rename = "point_d")]
    pub point_small_d: Option<Point2D>,
    /// Where the roof line crosses the femoral head diameter
    pub mid_coverage: Option<Point2D>,
    /// Acetabular contour from Left to Apex, both included
    #[serde(default)]
    pub roof: Vec<Point2D>,
}

impl LandmarksUs {
    /// Femoral head diameter length, when both ends are known
    pub fn femoral_head_diameter(&self) -> Option<f64> {
        match (&self.point_big_d, &self.point_small_d) {
            (Some(big), Some(small)) => Some(big.distance(small)),
            _ => None,
        }
    }

    /// All alpha and coverage landmarks present
    pub fn is_complete(&self) -> bool {
        self.left.is_some()
            && self.apex.is_some()
            && self.right.is_some()
            && self.point_big_d.is_some()
            && self.point_small_d.is_some()
            && self.mid_coverage.is_some()
    }
}

/// Ultrasound landmark extraction
pub fn extract_us(
    instances: &[SegmentationInstance],
    options: &ExtractionOptions,
) -> Result<LandmarksUs, SegmentationError> {
    validate_frame(instances)?;

    let mut landmarks = LandmarksUs::default();
    let head = largest_detection(instances, HipLabel::FemoralHead);

    if let Some(ilium) = largest_detection(instances, HipLabel::IlliumAndAcetabulum) {
        let head_hint = head.and_then(|h| centroid(&h.contour));
        find_alpha_landmarks(&ilium.contour, head_hint, &mut landmarks);
    }

    if let Some(head) = head {
        find_coverage_landmarks(&head.contour, options, &mut landmarks);
    }

    Ok(landmarks)
}

fn find_alpha_landmarks(contour: &[Point2D], head_hint: Option<Point2D>, landmarks: &mut LandmarksUs) {
    let by_x = |a: &&Point2D, b: &&Point2D| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y));
    let (Some(left), Some(right)) = (contour.iter().min_by(by_x), contour.iter().max_by(by_x)) else {
        return;
    };
    let (left, right) = (*left, *right);
    landmarks.left = Some(left);
    landmarks.right = Some(right);

    if left.distance(&right) < EPSILON {
        return;
    }

    // The femoral head sits on the positive side unless it says otherwise
    let side = head_hint
        .and_then(|h| signed_distance(&h, &left, &right))
        .filter(|d| d.abs() > EPSILON)
        .map(f64::signum)
        .unwrap_or(1.0);

    let depth = |p: &Point2D| signed_distance(p, &left, &right).map(|d| d * side).unwrap_or(0.0);

    let Some((apex_idx, apex_depth)) = contour
        .iter()
        .enumerate()
        .map(|(i, p)| (i, depth(p)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return;
    };
    if apex_depth <= EPSILON {
        return;
    }
    let apex = contour[apex_idx];
    landmarks.apex = Some(apex);

    let Some(left_idx) = contour.iter().position(|p| *p == left) else {
        return;
    };
    landmarks.roof = roof_arc(contour, left_idx, apex_idx, &depth);
}

/// The contour arc from Left to Apex lying deeper toward the femoral head
fn roof_arc(
    contour: &[Point2D],
    from: usize,
    to: usize,
    depth: &impl Fn(&Point2D) -> f64,
) -> Vec<Point2D> {
    let n = contour.len();
    let walk = |step: usize| {
        let mut arc = vec![contour[from]];
        let mut i = from;
        while i != to {
            i = (i + step) % n;
            arc.push(contour[i]);
        }
        arc
    };
    let forward = walk(1);
    let backward = walk(n - 1);

    let interior_depth = |arc: &[Point2D]| {
        let inner = &arc[1..arc.len().saturating_sub(1).max(1)];
        if inner.is_empty() {
            return f64::NEG_INFINITY;
        }
        inner.iter().map(depth).sum::<f64>() / inner.len() as f64
    };

    if interior_depth(&backward) > interior_depth(&forward) {
        backward
    } else {
        forward
    }
}

fn find_coverage_landmarks(contour: &[Point2D], options: &ExtractionOptions, landmarks: &mut LandmarksUs) {
    let (Some(left), Some(apex)) = (landmarks.left, landmarks.apex) else {
        return;
    };

    let min_x = contour.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = contour.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = contour.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = contour.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let width = max_x - min_x;
    let height = max_y - min_y;
    if width < EPSILON || height < EPSILON {
        return;
    }
    if (width - height).abs() / width.max(height) > options.max_femoral_head_asymmetry {
        return;
    }

    let radius = height / 2.0;
    let center = Point2D::new(min_x + width / 2.0, min_y + radius);

    // Diameter perpendicular to the roof line
    let length = left.distance(&apex);
    let (nx, ny) = (-(apex.y - left.y) / length, (apex.x - left.x) / length);
    let a = center.translate(nx * radius, ny * radius);
    let b = center.translate(-nx * radius, -ny * radius);
    let (small, big) = if a.y <= b.y { (a, b) } else { (b, a) };

    landmarks.point_small_d = Some(small);
    landmarks.point_big_d = Some(big);
    landmarks.mid_coverage = line_intersection(&left, &apex, &small, &big);
}
