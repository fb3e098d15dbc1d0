//! hipm-engine library interface
//!
//! Hip ultrasound and X-ray metrics: landmark extraction from segmentation
//! contours, 2D metrics per frame, 3D aggregation over ultrasound sweeps, and
//! a batch orchestrator that runs the pipeline over many inputs.

pub mod aggregation;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod frame_filter;
pub mod geometry;
pub mod landmarks;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod provider;
pub mod record;
pub mod segmentation;

pub use crate::batch::{BatchJob, BatchOrchestrator, BatchSummary, JobRegistry, JobState};
pub use crate::config::AnalysisConfig;
pub use crate::error::{JobError, JobErrorKind, ProviderError, RegistryError, SegmentationError};
pub use crate::landmarks::{Landmarks, Modality};
pub use crate::metrics::FrameMetrics;
pub use crate::provider::{JsonSegmentationProvider, ProviderRegistry, SegmentationProvider};
pub use crate::record::{DevMetrics, MetricRecord};
