//! Segmentation instances produced by an external provider
//!
//! One frame holds any number of instances. An instance is either a
//! detection (contour plus optional mask, confidence and bounding box) or an
//! explicit empty marker saying the class was looked for and not found.

use serde::{Deserialize, Serialize};

use crate::error::SegmentationError;
use crate::geometry::{polygon_area, Point2D};

/// Minimum contour length that can define a line or shape
pub const MIN_CONTOUR_POINTS: usize = 3;

/// Anatomical class labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HipLabel {
    IlliumAndAcetabulum,
    FemoralHead,
    OsIchium,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point2D,
    pub max: Point2D,
}

/// Row-major raster mask; non-zero bytes are foreground
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn foreground_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

/// A detected region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub contour: Vec<Point2D>,
    #[serde(default)]
    pub mask: Option<Mask>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(contour: Vec<Point2D>) -> Self {
        Self {
            contour,
            mask: None,
            confidence: None,
            bbox: None,
        }
    }

    /// Region area: mask pixel count when a mask exists, else polygon area
    pub fn area(&self) -> f64 {
        match &self.mask {
            Some(mask) => mask.foreground_pixels() as f64,
            None => polygon_area(&self.contour),
        }
    }
}

/// One segmentation result for one class in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentationInstance {
    Detected { label: HipLabel, detection: Detection },
    Empty { label: HipLabel },
}

impl SegmentationInstance {
    pub fn detected(label: HipLabel, contour: Vec<Point2D>) -> Self {
        SegmentationInstance::Detected {
            label,
            detection: Detection::new(contour),
        }
    }

    pub fn empty(label: HipLabel) -> Self {
        SegmentationInstance::Empty { label }
    }

    pub fn label(&self) -> HipLabel {
        match self {
            SegmentationInstance::Detected { label, .. } | SegmentationInstance::Empty { label } => {
                *label
            }
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            SegmentationInstance::Detected { detection, .. } => Some(detection),
            SegmentationInstance::Empty { .. } => None,
        }
    }

    /// Fails when a detected contour is too short to define a shape
    pub fn validate(&self) -> Result<(), SegmentationError> {
        match self {
            SegmentationInstance::Detected { label, detection } => {
                if detection.contour.len() < MIN_CONTOUR_POINTS {
                    return Err(SegmentationError::TooFewPoints {
                        label: *label,
                        needed: MIN_CONTOUR_POINTS,
                        got: detection.contour.len(),
                    });
                }
                Ok(())
            }
            SegmentationInstance::Empty { .. } => Ok(()),
        }
    }
}

/// All instances of one frame
pub type FrameSegmentation = Vec<SegmentationInstance>;

/// Every detection of `label` in a frame
pub fn detections(instances: &[SegmentationInstance], label: HipLabel) -> Vec<&Detection> {
    instances
        .iter()
        .filter(|i| i.label() == label)
        .filter_map(SegmentationInstance::detection)
        .collect()
}

/// The largest detection of `label`, if any
pub fn largest_detection(instances: &[SegmentationInstance], label: HipLabel) -> Option<&Detection> {
    detections(instances, label)
        .into_iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
}

/// Validate every instance of a frame
pub fn validate_frame(instances: &[SegmentationInstance]) -> Result<(), SegmentationError> {
    instances.iter().try_for_each(SegmentationInstance::validate)
}
