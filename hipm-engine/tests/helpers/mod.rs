//! Shared fixtures for hipm-engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hipm_engine::config::AnalysisConfig;
use hipm_engine::geometry::Point2D;
use hipm_engine::segmentation::{FrameSegmentation, HipLabel, SegmentationInstance};
use hipm_engine::{JobRegistry, Modality, ProviderError, SegmentationProvider, BatchOrchestrator};

type Script = dyn Fn(&str, u32) -> Result<Vec<FrameSegmentation>, ProviderError> + Send + Sync;

/// Provider driven by a closure of (input id, call number starting at 1)
pub struct ScriptedProvider {
    modality: Modality,
    script: Box<Script>,
    calls: Mutex<HashMap<String, u32>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<F>(modality: Modality, script: F) -> Self
    where
        F: Fn(&str, u32) -> Result<Vec<FrameSegmentation>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            modality,
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Always returns `frames`
    pub fn fixed(frames: Vec<FrameSegmentation>) -> Self {
        Self::new(Modality::Ultrasound, move |_, _| Ok(frames.clone()))
    }

    pub fn calls(&self, input_id: &str) -> u32 {
        self.calls.lock().unwrap().get(input_id).copied().unwrap_or(0)
    }

    /// Highest number of overlapping `segment` calls seen
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl SegmentationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn segment(
        &self,
        input: &str,
        _config: &AnalysisConfig,
    ) -> Result<Vec<FrameSegmentation>, ProviderError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(input.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let result = (self.script)(input, call);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn ilium() -> SegmentationInstance {
    SegmentationInstance::detected(
        HipLabel::IlliumAndAcetabulum,
        vec![
            Point2D::new(0.0, 100.0),
            Point2D::new(100.0, 95.0),
            Point2D::new(200.0, 100.0),
            Point2D::new(195.0, 105.0),
            Point2D::new(120.0, 110.0),
            Point2D::new(100.0, 150.0),
            Point2D::new(50.0, 115.0),
            Point2D::new(5.0, 105.0),
        ],
    )
}

pub fn femoral_head(radius: f64) -> SegmentationInstance {
    let contour = (0..8)
        .map(|k| {
            let t = (k as f64) * std::f64::consts::FRAC_PI_4;
            Point2D::new(150.0 + radius * t.cos(), 190.0 + radius * t.sin())
        })
        .collect();
    SegmentationInstance::detected(HipLabel::FemoralHead, contour)
}

/// Ultrasound frame with ilium and, optionally, a round femoral head
pub fn us_frame(head: bool) -> FrameSegmentation {
    let head = if head {
        femoral_head(40.0)
    } else {
        SegmentationInstance::empty(HipLabel::FemoralHead)
    };
    vec![ilium(), head, SegmentationInstance::empty(HipLabel::OsIchium)]
}

pub fn sweep(frames: usize, head: bool) -> Vec<FrameSegmentation> {
    (0..frames).map(|_| us_frame(head)).collect()
}

/// Config with short timeouts for tests
pub fn test_config() -> AnalysisConfig {
    AnalysisConfig {
        job_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    config: AnalysisConfig,
) -> (BatchOrchestrator, Arc<JobRegistry>) {
    let registry = Arc::new(JobRegistry::new());
    let orchestrator = BatchOrchestrator::new(Arc::clone(&registry), provider, Arc::new(config));
    (orchestrator, registry)
}
