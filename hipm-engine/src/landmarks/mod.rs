//! Landmark extraction
//!
//! Converts the segmentation instances of one frame into the canonical
//! landmark set of its modality. Extraction is pure: missing classes give
//! absent landmarks, and only structurally invalid contours are errors.

mod us;
mod xray;

pub use us::{extract_us, LandmarksUs};
pub use xray::{extract_xray, LandmarksXray};

use serde::{Deserialize, Serialize};

use crate::error::SegmentationError;
use crate::segmentation::SegmentationInstance;

/// Default limit on femoral head diameter asymmetry
pub const DEFAULT_MAX_FEMORAL_HEAD_ASYMMETRY: f64 = 0.35;

/// Imaging modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Ultrasound,
    Xray,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Ultrasound => "ultrasound",
            Modality::Xray => "xray",
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ultrasound" | "us" => Ok(Modality::Ultrasound),
            "xray" | "x-ray" => Ok(Modality::Xray),
            other => Err(format!("unknown modality: {}", other)),
        }
    }
}

/// Tunables for extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionOptions {
    /// Femoral heads whose x and y extents differ by more than this
    /// fraction of the larger are treated as non-circular
    pub max_femoral_head_asymmetry: f64,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            max_femoral_head_asymmetry: DEFAULT_MAX_FEMORAL_HEAD_ASYMMETRY,
        }
    }
}

/// Landmark set of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum Landmarks {
    Ultrasound(LandmarksUs),
    Xray(LandmarksXray),
}

impl Landmarks {
    pub fn modality(&self) -> Modality {
        match self {
            Landmarks::Ultrasound(_) => Modality::Ultrasound,
            Landmarks::Xray(_) => Modality::Xray,
        }
    }

    pub fn as_us(&self) -> Option<&LandmarksUs> {
        match self {
            Landmarks::Ultrasound(l) => Some(l),
            Landmarks::Xray(_) => None,
        }
    }
}

/// Extract landmarks with default options
pub fn extract(
    instances: &[SegmentationInstance],
    modality: Modality,
) -> Result<Landmarks, SegmentationError> {
    extract_with(instances, modality, &ExtractionOptions::default())
}

/// Extract landmarks of `modality` from one frame's instances
pub fn extract_with(
    instances: &[SegmentationInstance],
    modality: Modality,
    options: &ExtractionOptions,
) -> Result<Landmarks, SegmentationError> {
    match modality {
        Modality::Ultrasound => extract_us(instances, options).map(Landmarks::Ultrasound),
        Modality::Xray => extract_xray(instances).map(Landmarks::Xray),
    }
}
