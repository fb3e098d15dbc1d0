//! Single-input analysis pipeline
//!
//! segmentation → landmarks → 2D metrics → 3D aggregation → record
//!
//! Runs synchronously on a blocking thread. Cancellation is observed after
//! extraction, after the 2D metrics and after aggregation. The partial
//! record slot is filled as soon as the 2D metrics exist, so an attempt cut
//! short by a timeout still leaves something behind.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregation::{acetabular_extent, aggregate, femoral_head_centre, AggregationParams};
use crate::config::AnalysisConfig;
use crate::error::{JobError, ProviderError, SegmentationError};
use crate::frame_filter::FilteredSweep;
use crate::landmarks::{extract_with, Landmarks, LandmarksUs, Modality};
use crate::metrics::{compute_metrics, FrameMetrics};
use crate::provider::SegmentationProvider;
use crate::record::{DevMetrics, MetricRecord};
use crate::segmentation::{FrameSegmentation, HipLabel, SegmentationInstance};

/// Latest partial record of an attempt, readable after the attempt is gone
#[derive(Debug, Default, Clone)]
pub struct PartialRecordSlot {
    inner: Arc<Mutex<Option<MetricRecord>>>,
}

impl PartialRecordSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, record: MetricRecord) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(record);
        }
    }

    pub fn take(&self) -> Option<MetricRecord> {
        self.inner.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Analysis of one input with one provider
pub struct Pipeline {
    provider: Arc<dyn SegmentationProvider>,
    config: Arc<AnalysisConfig>,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn SegmentationProvider>, config: Arc<AnalysisConfig>) -> Self {
        Self { provider, config }
    }

    /// Analyse `input_id` into a record
    pub fn run(
        &self,
        input_id: &str,
        cancel: &CancellationToken,
        partial: &PartialRecordSlot,
    ) -> Result<MetricRecord, JobError> {
        checkpoint(cancel)?;

        let frames = self.segment(input_id)?;
        if frames.is_empty() {
            return Err(SegmentationError::NoFrames.into());
        }
        let modality = self.provider.modality();
        debug!(
            input_id = %input_id,
            provider = %self.provider.name(),
            frames = frames.len(),
            "Segmentation received"
        );

        let options = self.config.extraction_options();
        let landmarks = frames
            .iter()
            .map(|frame| extract_with(frame, modality, &options))
            .collect::<Result<Vec<Landmarks>, SegmentationError>>()?;
        checkpoint(cancel)?;

        let metrics: Vec<FrameMetrics> = landmarks.iter().map(compute_metrics).collect();
        let mut dev = dev_metrics(&frames, &landmarks, &metrics);
        partial.store(MetricRecord::new(
            modality,
            metrics.clone(),
            None,
            landmarks.clone(),
            dev.clone(),
        ));
        checkpoint(cancel)?;

        let volume = if modality == Modality::Ultrasound && frames.len() > 1 {
            let sweep: Vec<LandmarksUs> = landmarks
                .iter()
                .filter_map(|l| l.as_us().cloned())
                .collect();
            let filtered = match &self.config.frame_filter {
                Some(filter) => filter.apply(&sweep, &metrics),
                None => FilteredSweep {
                    sweep,
                    metrics: metrics.clone(),
                    excluded: Vec::new(),
                },
            };
            if !filtered.excluded.is_empty() {
                debug!(input_id = %input_id, excluded = ?filtered.excluded, "Bad frames excluded");
            }
            let sweep = filtered.sweep;
            let mut volume = aggregate(
                &sweep,
                &filtered.metrics,
                &AggregationParams::from(self.config.as_ref()),
            );
            volume.excluded_frames = filtered.excluded;
            dev.graf_frame = volume.graf_frame;
            dev.acetabular_mid_frame = acetabular_extent(&sweep).map(|(first, last)| (first + last) / 2);
            dev.femoral_mid_frame = femoral_head_centre(&sweep).map(|c| c.round() as usize);
            dev.critical_error = volume.critical;
            if !volume.recorded_errors.is_empty() {
                dev.recorded_error = Some(volume.recorded_errors.join(" "));
            }
            if volume.critical {
                warn!(input_id = %input_id, errors = ?volume.recorded_errors, "Critical aggregation error");
            }
            Some(volume)
        } else {
            None
        };
        checkpoint(cancel)?;

        Ok(MetricRecord::new(modality, metrics, volume, landmarks, dev))
    }

    fn segment(&self, input_id: &str) -> Result<Vec<FrameSegmentation>, JobError> {
        let provider = &self.provider;
        let config = self.config.as_ref();
        let result = catch_unwind(AssertUnwindSafe(|| provider.segment(input_id, config)))
            .map_err(|payload| ProviderError::Panicked(panic_message(payload.as_ref())))?;
        Ok(result?)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn dev_metrics(
    frames: &[FrameSegmentation],
    landmarks: &[Landmarks],
    metrics: &[FrameMetrics],
) -> DevMetrics {
    let os_ichium_detected = frames.iter().flatten().any(|instance| {
        instance.label() == HipLabel::OsIchium && instance.detection().is_some()
    });
    let frames_segmented = frames
        .iter()
        .filter(|frame| frame.iter().any(|i| i.detection().is_some()))
        .count();
    let frames_marked = landmarks
        .iter()
        .zip(metrics)
        .filter(|(lm, m)| match lm {
            Landmarks::Ultrasound(us) => us.is_complete(),
            Landmarks::Xray(_) => m.has_any(),
        })
        .count();

    DevMetrics {
        os_ichium_detected,
        frames_segmented,
        frames_marked,
        total_frames: frames.len(),
        ..Default::default()
    }
}

/// Frame of empty instances for every label, handy when a provider has
/// nothing to report for a frame
pub fn empty_frame() -> FrameSegmentation {
    [HipLabel::IlliumAndAcetabulum, HipLabel::FemoralHead, HipLabel::OsIchium]
        .into_iter()
        .map(SegmentationInstance::empty)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2D;

    struct Fixed {
        frames: Vec<FrameSegmentation>,
    }

    impl SegmentationProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn modality(&self) -> Modality {
            Modality::Ultrasound
        }
        fn segment(&self, _: &str, _: &AnalysisConfig) -> Result<Vec<FrameSegmentation>, ProviderError> {
            Ok(self.frames.clone())
        }
    }

    struct Panicking;

    impl SegmentationProvider for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn modality(&self) -> Modality {
            Modality::Ultrasound
        }
        fn segment(&self, _: &str, _: &AnalysisConfig) -> Result<Vec<FrameSegmentation>, ProviderError> {
            panic!("model exploded")
        }
    }

    fn ilium() -> SegmentationInstance {
        SegmentationInstance::detected(
            HipLabel::IlliumAndAcetabulum,
            vec![
                Point2D::new(0.0, 100.0),
                Point2D::new(60.0, 120.0),
                Point2D::new(100.0, 150.0),
                Point2D::new(200.0, 100.0),
                Point2D::new(100.0, 90.0),
            ],
        )
    }

    fn pipeline(provider: impl SegmentationProvider + 'static) -> Pipeline {
        Pipeline::new(Arc::new(provider), Arc::new(AnalysisConfig::default()))
    }

    #[test]
    fn test_single_frame_has_no_volume() {
        let p = pipeline(Fixed {
            frames: vec![vec![ilium(), SegmentationInstance::empty(HipLabel::FemoralHead)]],
        });
        let slot = PartialRecordSlot::new();
        let record = p.run("a.png", &CancellationToken::new(), &slot).unwrap();

        assert!(record.volume().is_none());
        assert!(record.frames()[0].alpha.is_some());
        assert!(record.frames()[0].coverage.is_none());
        assert_eq!(record.dev_metrics().total_frames, 1);
        assert_eq!(record.dev_metrics().frames_segmented, 1);
        assert!(slot.take().is_some());
    }

    #[test]
    fn test_sweep_is_aggregated() {
        let frame = vec![ilium(), SegmentationInstance::empty(HipLabel::FemoralHead)];
        let p = pipeline(Fixed {
            frames: vec![frame.clone(), frame.clone(), frame],
        });
        let record = p
            .run("sweep.dcm", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap();
        let volume = record.volume().unwrap();
        assert_eq!(volume.total_frames, 3);
        assert!(volume.graf_frame.is_some());
        assert!(volume.centering_ratio.is_none());
        assert_eq!(record.dev_metrics().graf_frame, volume.graf_frame);
        assert_eq!(record.dev_metrics().acetabular_mid_frame, Some(1));
    }

    #[test]
    fn test_bad_frames_excluded_from_volume_only() {
        // Last frame: flat roof with Apex next to Right
        let squashed = SegmentationInstance::detected(
            HipLabel::IlliumAndAcetabulum,
            vec![
                Point2D::new(0.0, 100.0),
                Point2D::new(190.0, 110.0),
                Point2D::new(200.0, 100.0),
                Point2D::new(100.0, 95.0),
            ],
        );
        let good = vec![ilium(), SegmentationInstance::empty(HipLabel::FemoralHead)];
        let bad = vec![squashed, SegmentationInstance::empty(HipLabel::FemoralHead)];
        let frames = vec![good.clone(), good.clone(), good, bad];

        let record = pipeline(Fixed { frames: frames.clone() })
            .run("sweep.dcm", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap();
        let volume = record.volume().unwrap();
        assert_eq!(volume.excluded_frames, vec![3]);
        assert!(record.frames()[3].alpha.is_some());
        assert_eq!(volume.anterior_frame, Some(2));

        let unfiltered = Pipeline::new(
            Arc::new(Fixed { frames }),
            Arc::new(AnalysisConfig {
                frame_filter: None,
                ..Default::default()
            }),
        );
        let record = unfiltered
            .run("sweep.dcm", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap();
        let volume = record.volume().unwrap();
        assert!(volume.excluded_frames.is_empty());
        assert_eq!(volume.anterior_frame, Some(3));
    }

    #[test]
    fn test_no_frames_is_malformed() {
        let p = pipeline(Fixed { frames: Vec::new() });
        let err = p
            .run("x", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap_err();
        assert!(matches!(err, JobError::MalformedSegmentation(_)));
    }

    #[test]
    fn test_short_contour_is_malformed() {
        let p = pipeline(Fixed {
            frames: vec![vec![SegmentationInstance::detected(
                HipLabel::IlliumAndAcetabulum,
                vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0)],
            )]],
        });
        let err = p
            .run("x", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap_err();
        assert!(matches!(err, JobError::MalformedSegmentation(_)));
    }

    #[test]
    fn test_panic_becomes_plugin_error() {
        let p = pipeline(Panicking);
        let err = p
            .run("x", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap_err();
        assert_eq!(err, JobError::PluginError("provider panicked: model exploded".to_string()));
    }

    #[test]
    fn test_cancelled_before_start() {
        let p = pipeline(Fixed { frames: vec![empty_frame()] });
        let token = CancellationToken::new();
        token.cancel();
        let slot = PartialRecordSlot::new();
        assert_eq!(p.run("x", &token, &slot).unwrap_err(), JobError::Cancelled);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_empty_frame_yields_absent_metrics() {
        let p = pipeline(Fixed { frames: vec![empty_frame()] });
        let record = p
            .run("x", &CancellationToken::new(), &PartialRecordSlot::new())
            .unwrap();
        assert!(!record.frames()[0].has_any());
        assert_eq!(record.dev_metrics().frames_segmented, 0);
    }
}
