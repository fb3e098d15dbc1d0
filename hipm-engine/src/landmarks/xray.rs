use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SegmentationError;
use crate::geometry::{centroid, Point2D, EPSILON};
use crate::segmentation::{detections, validate_frame, Detection, HipLabel, SegmentationInstance};

/// Pelvic X-ray landmarks
///
/// `l`/`r` follow image left and right. `o` is the lateral acetabular edge,
/// `i` the medial (triradiate) point that anchors the horizontal H-line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarksXray {
    pub pel_l_o: Option<Point2D>,
    pub pel_l_i: Option<Point2D>,
    pub pel_r_o: Option<Point2D>,
    pub pel_r_i: Option<Point2D>,
    pub fem_l: Option<Point2D>,
    pub fem_r: Option<Point2D>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn of(x: f64, midline: f64) -> Side {
        if x < midline {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// Horizontal extent of a set of points
#[derive(Debug, Clone, Copy)]
struct Extent {
    min_x: f64,
    max_x: f64,
}

impl Extent {
    fn of<'a>(points: impl IntoIterator<Item = &'a Point2D>) -> Option<Extent> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Extent { min_x: p.x, max_x: p.x },
                Some(e) => Extent {
                    min_x: e.min_x.min(p.x),
                    max_x: e.max_x.max(p.x),
                },
            })
        })
    }

    fn centre(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }
}

/// X-ray landmark extraction
///
/// The midline comes from geometry, never from how densely a contour is
/// sampled:
/// - two or more pelvis detections: the gap between the two largest, or the
///   centre of their joint extent when they overlap;
/// - a single detection: halfway between the outermost femoral heads. A
///   contour lying wholly on one side of it fills that side only.
///
/// A single detection without two femoral heads has no midline and yields no
/// pelvis landmarks.
pub fn extract_xray(instances: &[SegmentationInstance]) -> Result<LandmarksXray, SegmentationError> {
    validate_frame(instances)?;

    let mut landmarks = LandmarksXray::default();

    let pelvis = detections(instances, HipLabel::IlliumAndAcetabulum);
    let heads: Vec<Point2D> = detections(instances, HipLabel::FemoralHead)
        .into_iter()
        .filter_map(|h| centroid(&h.contour))
        .collect();

    let Some(midline) = find_midline(&pelvis, &heads) else {
        if !pelvis.is_empty() {
            debug!(heads = heads.len(), "Single pelvis contour without a midline reference");
        }
        return Ok(landmarks);
    };

    let points: Vec<Point2D> = pelvis
        .iter()
        .flat_map(|d| d.contour.iter().copied())
        .collect();

    for side in [Side::Left, Side::Right] {
        let own: Vec<Point2D> = points
            .iter()
            .copied()
            .filter(|p| Side::of(p.x, midline) == side)
            .collect();
        let (outer, inner) = pelvis_side(&own, midline, side);
        match side {
            Side::Left => {
                landmarks.pel_l_o = outer;
                landmarks.pel_l_i = inner;
            }
            Side::Right => {
                landmarks.pel_r_o = outer;
                landmarks.pel_r_i = inner;
            }
        }
    }

    // Femoral heads are best-effort
    for c in heads {
        match Side::of(c.x, midline) {
            Side::Left => landmarks.fem_l.get_or_insert(c),
            Side::Right => landmarks.fem_r.get_or_insert(c),
        };
    }

    Ok(landmarks)
}

fn find_midline(pelvis: &[&Detection], heads: &[Point2D]) -> Option<f64> {
    match pelvis {
        [] => None,
        [_] => {
            let h = Extent::of(heads)?;
            (h.max_x - h.min_x > EPSILON).then(|| h.centre())
        }
        _ => {
            let mut by_area: Vec<&Detection> = pelvis.to_vec();
            by_area.sort_by(|a, b| b.area().total_cmp(&a.area()));
            let mut pair = [Extent::of(&by_area[0].contour)?, Extent::of(&by_area[1].contour)?];
            pair.sort_by(|a, b| a.min_x.total_cmp(&b.min_x));
            let [left, right] = pair;
            if left.max_x < right.min_x {
                Some((left.max_x + right.min_x) / 2.0)
            } else {
                Extent::of(pelvis.iter().flat_map(|d| d.contour.iter())).map(|e| e.centre())
            }
        }
    }
}

/// Lateral extreme and lowest medial-half point of one side
fn pelvis_side(points: &[Point2D], midline: f64, side: Side) -> (Option<Point2D>, Option<Point2D>) {
    let lateral = |p: &&Point2D| match side {
        Side::Left => -p.x,
        Side::Right => p.x,
    };
    let Some(outer) = points
        .iter()
        .max_by(|a, b| lateral(a).total_cmp(&lateral(b)).then(a.y.total_cmp(&b.y)))
        .copied()
    else {
        return (None, None);
    };

    let half = (outer.x + midline) / 2.0;
    let inner = points
        .iter()
        .filter(|p| match side {
            Side::Left => p.x >= half,
            Side::Right => p.x <= half,
        })
        .max_by(|a, b| a.y.total_cmp(&b.y))
        .copied();

    (Some(outer), inner)
}
