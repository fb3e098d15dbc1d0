//! Segmentation provider boundary
//!
//! AI models live outside this crate. The orchestrator only knows the
//! `SegmentationProvider` trait and picks an implementation by name from a
//! `ProviderRegistry` built by the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::ProviderError;
use crate::landmarks::Modality;
use crate::segmentation::FrameSegmentation;

/// A source of per-frame segmentation for one input
///
/// Implementations must be callable from several worker threads at once.
pub trait SegmentationProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Modality of the frames this provider returns
    fn modality(&self) -> Modality;

    /// Segment `input` (a file path or identifier) into ordered frames
    fn segment(
        &self,
        input: &str,
        config: &AnalysisConfig,
    ) -> Result<Vec<FrameSegmentation>, ProviderError>;
}

/// Named providers
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SegmentationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn SegmentationProvider>) {
        let name = name.into();
        debug!(provider = %name, "Registered segmentation provider");
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SegmentationProvider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotRegistered(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn SegmentationProvider>> {
        self.providers.remove(name)
    }
}

/// On-disk segmentation document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationFile {
    pub frames: Vec<FrameSegmentation>,
}

/// Reads manual segmentations from a `<input>.seg.json` sidecar
pub struct JsonSegmentationProvider {
    modality: Modality,
}

impl JsonSegmentationProvider {
    pub const SIDECAR_SUFFIX: &'static str = ".seg.json";

    pub fn new(modality: Modality) -> Self {
        Self { modality }
    }

    /// Sidecar path for an input file
    pub fn sidecar_path(input: &Path) -> PathBuf {
        let mut name = input.as_os_str().to_os_string();
        name.push(Self::SIDECAR_SUFFIX);
        PathBuf::from(name)
    }
}

impl SegmentationProvider for JsonSegmentationProvider {
    fn name(&self) -> &str {
        "manual"
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn segment(
        &self,
        input: &str,
        _config: &AnalysisConfig,
    ) -> Result<Vec<FrameSegmentation>, ProviderError> {
        let path = Self::sidecar_path(Path::new(input));
        let content = std::fs::read_to_string(&path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: SegmentationFile = serde_json::from_str(&content)?;
        Ok(file.frames)
    }
}
