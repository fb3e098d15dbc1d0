//! Metric record: the immutable result of one analysis
//!
//! The serialized form is stable across runs: every metric key is always
//! present and absent values are `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregation::VolumeMetrics;
use crate::config::AnalysisConfig;
use crate::landmarks::{Landmarks, Modality};
use crate::metrics::FrameMetrics;

/// Development/debug side channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevMetrics {
    pub os_ichium_detected: bool,
    /// Frames with at least one detection
    pub frames_segmented: usize,
    /// Frames whose Alpha Angle could be measured
    pub frames_marked: usize,
    pub graf_frame: Option<usize>,
    pub acetabular_mid_frame: Option<usize>,
    pub femoral_mid_frame: Option<usize>,
    pub total_frames: usize,
    pub critical_error: bool,
    pub recorded_error: Option<String>,
}

/// Result of analysing one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    modality: Modality,
    frames: Vec<FrameMetrics>,
    volume: Option<VolumeMetrics>,
    landmarks: Vec<Landmarks>,
    dev_metrics: DevMetrics,
    recorded_errors: Vec<String>,
    critical_error: bool,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RecordDocumentRef<'a> {
    modality: Modality,
    keyphrase: &'a str,
    frames: &'a [FrameMetrics],
    volume: Option<&'a VolumeMetrics>,
    landmarks: &'a [Landmarks],
    dev_metrics: &'a DevMetrics,
    recorded_errors: &'a [String],
    recorded_error: Option<String>,
    critical_error: bool,
    serialized_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RecordDocument {
    modality: Modality,
    frames: Vec<FrameMetrics>,
    volume: Option<VolumeMetrics>,
    landmarks: Vec<Landmarks>,
    dev_metrics: DevMetrics,
    recorded_errors: Vec<String>,
    critical_error: bool,
    serialized_at: DateTime<Utc>,
}

impl MetricRecord {
    /// Build a record; recorded errors and the critical flag come from the
    /// volume metrics when present
    pub fn new(
        modality: Modality,
        frames: Vec<FrameMetrics>,
        volume: Option<VolumeMetrics>,
        landmarks: Vec<Landmarks>,
        dev_metrics: DevMetrics,
    ) -> Self {
        let recorded_errors = volume
            .as_ref()
            .map(|v| v.recorded_errors.clone())
            .unwrap_or_default();
        let critical_error = volume.as_ref().map_or(false, |v| v.critical);
        Self {
            modality,
            frames,
            volume,
            landmarks,
            dev_metrics,
            recorded_errors,
            critical_error,
            created_at: Utc::now(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn frames(&self) -> &[FrameMetrics] {
        &self.frames
    }

    pub fn volume(&self) -> Option<&VolumeMetrics> {
        self.volume.as_ref()
    }

    pub fn landmarks(&self) -> &[Landmarks] {
        &self.landmarks
    }

    pub fn dev_metrics(&self) -> &DevMetrics {
        &self.dev_metrics
    }

    pub fn recorded_errors(&self) -> &[String] {
        &self.recorded_errors
    }

    pub fn critical_error(&self) -> bool {
        self.critical_error
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Centering Ratio, only defined for multi-frame sweeps
    pub fn centering_ratio(&self) -> Option<f64> {
        self.volume.as_ref().and_then(|v| v.centering_ratio)
    }

    /// Graf window Alpha for sweeps, otherwise the single frame's Alpha
    pub fn headline_alpha(&self) -> Option<f64> {
        match &self.volume {
            Some(v) => v.graf.alpha,
            None => self.frames.first().and_then(|f| f.alpha),
        }
    }

    /// Structured mapping for external reporting
    ///
    /// `dev_metrics` overrides the record's own side channel when given.
    pub fn serialize(
        &self,
        config: &AnalysisConfig,
        dev_metrics: Option<&DevMetrics>,
    ) -> Result<Value, serde_json::Error> {
        let recorded_error = if self.recorded_errors.is_empty() {
            None
        } else {
            Some(self.recorded_errors.join(" "))
        };
        serde_json::to_value(RecordDocumentRef {
            modality: self.modality,
            keyphrase: &config.name,
            frames: &self.frames,
            volume: self.volume.as_ref(),
            landmarks: &self.landmarks,
            dev_metrics: dev_metrics.unwrap_or(&self.dev_metrics),
            recorded_errors: &self.recorded_errors,
            recorded_error,
            critical_error: self.critical_error,
            serialized_at: self.created_at,
        })
    }

    /// Rebuild a record from its serialized mapping
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let doc = RecordDocument::deserialize(value)?;
        Ok(Self {
            modality: doc.modality,
            frames: doc.frames,
            volume: doc.volume,
            landmarks: doc.landmarks,
            dev_metrics: doc.dev_metrics,
            recorded_errors: doc.recorded_errors,
            critical_error: doc.critical_error,
            created_at: doc.serialized_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{aggregate, AggregationParams};
    use crate::geometry::Point2D;
    use crate::landmarks::LandmarksUs;

    fn single_frame_record() -> MetricRecord {
        let lm = LandmarksUs {
            left: Some(Point2D::new(0.0, 100.0)),
            apex: Some(Point2D::new(100.0, 150.0)),
            right: Some(Point2D::new(200.0, 100.0)),
            ..Default::default()
        };
        let frames = vec![FrameMetrics {
            alpha: Some(26.5),
            curvature: Some(0.25),
            ..Default::default()
        }];
        MetricRecord::new(
            Modality::Ultrasound,
            frames,
            None,
            vec![Landmarks::Ultrasound(lm)],
            DevMetrics {
                total_frames: 1,
                frames_marked: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_absent_fields_are_explicit_null() {
        let record = single_frame_record();
        let json = record.serialize(&AnalysisConfig::default(), None).unwrap();

        assert_eq!(json["keyphrase"], "default");
        assert_eq!(json["modality"], "ultrasound");
        assert!(json["volume"].is_null());
        let frame = &json["frames"][0];
        assert_eq!(frame["alpha"], 26.5);
        for key in [
            "coverage",
            "acetabular_index_left",
            "acetabular_index_right",
            "wiberg_left",
            "wiberg_right",
        ] {
            assert!(frame.get(key).is_some(), "{} missing", key);
            assert!(frame[key].is_null());
        }
        assert!(json["landmarks"][0]["point_D"].is_null());
        assert!(json["recorded_error"].is_null());
    }

    #[test]
    fn test_round_trip_preserves_values_and_nulls() {
        let record = single_frame_record();
        let json = record.serialize(&AnalysisConfig::default(), None).unwrap();
        let back = MetricRecord::from_value(&json).unwrap();
        assert_eq!(back, record);
        assert!(back.frames()[0].coverage.is_none());
    }

    #[test]
    fn test_round_trip_with_volume() {
        let frames: Vec<FrameMetrics> = [58.25, 61.5, 60.75]
            .iter()
            .map(|&a| FrameMetrics {
                alpha: Some(a),
                coverage: Some(a / 100.0),
                ..Default::default()
            })
            .collect();
        let volume = aggregate(&[], &frames, &AggregationParams::default());
        let record = MetricRecord::new(Modality::Ultrasound, frames, Some(volume), Vec::new(), DevMetrics::default());

        let json = record.serialize(&AnalysisConfig::default(), None).unwrap();
        assert!(json["volume"]["centering_ratio"].is_null());
        assert_eq!(json["volume"]["graf_frame"], 1);
        assert_eq!(json["volume"]["posterior_frame"], 0);
        assert!(json["recorded_error"].is_null());
        assert_eq!(MetricRecord::from_value(&json).unwrap(), record);
    }

    #[test]
    fn test_dev_metrics_override() {
        let record = single_frame_record();
        let dev = DevMetrics {
            os_ichium_detected: true,
            ..Default::default()
        };
        let json = record.serialize(&AnalysisConfig::default(), Some(&dev)).unwrap();
        assert_eq!(json["dev_metrics"]["os_ichium_detected"], true);
        assert!(json["dev_metrics"]["graf_frame"].is_null());
    }

    #[test]
    fn test_headline_alpha() {
        assert_eq!(single_frame_record().headline_alpha(), Some(26.5));
        assert!(single_frame_record().centering_ratio().is_none());
    }
}
