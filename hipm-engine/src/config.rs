//! Analysis configuration
//!
//! One immutable struct carries every recognized setting. It is built once
//! (from defaults or a parsed TOML file) and shared behind an `Arc`.

use std::path::PathBuf;
use std::time::Duration;

use hipm_common::config::TomlConfig;
use hipm_common::{Error, Result};

use crate::frame_filter::FrameFilter;
use crate::landmarks::{ExtractionOptions, Modality, DEFAULT_MAX_FEMORAL_HEAD_ASYMMETRY};

/// Relative weights of the three planes in ACA
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcaWeights {
    pub graf: f64,
    pub anterior: f64,
    pub posterior: f64,
}

impl Default for AcaWeights {
    fn default() -> Self {
        Self {
            graf: 0.6,
            anterior: 0.2,
            posterior: 0.2,
        }
    }
}

/// Analysis and batch settings
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Configuration name, echoed as `keyphrase` in serialized records
    pub name: String,
    pub modality: Modality,
    /// Registered segmentation provider to use
    pub provider: String,
    /// Graf window half-width as a fraction of sweep length
    pub graf_window_fraction: f64,
    pub aca_weights: AcaWeights,
    pub max_femoral_head_asymmetry: f64,
    /// Bad-frame thresholds applied before aggregation; `None` keeps every frame
    pub frame_filter: Option<FrameFilter>,
    /// Concurrent jobs
    pub workers: usize,
    /// Attempts per job before it is declared dead
    pub max_attempts: u32,
    /// Time budget of one attempt
    pub job_timeout: Duration,
    /// Lowercase extensions without the dot
    pub input_extensions: Vec<String>,
    pub datasets: Vec<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            modality: Modality::Ultrasound,
            provider: "manual".to_string(),
            graf_window_fraction: 0.05,
            aca_weights: AcaWeights::default(),
            max_femoral_head_asymmetry: DEFAULT_MAX_FEMORAL_HEAD_ASYMMETRY,
            frame_filter: Some(FrameFilter::default()),
            workers: 4,
            max_attempts: 2,
            job_timeout: Duration::from_secs(30),
            input_extensions: vec![
                "dcm".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
            ],
            datasets: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Overlay the values present in a TOML config onto the defaults
    pub fn from_toml(toml: &TomlConfig) -> Result<Self> {
        let d = Self::default();
        let a = &toml.analysis;
        let b = &toml.batch;

        let modality = match &a.modality {
            Some(m) => m.parse::<Modality>().map_err(Error::Config)?,
            None => d.modality,
        };

        let config = Self {
            name: a.name.clone().unwrap_or(d.name),
            modality,
            provider: b.provider.clone().unwrap_or(d.provider),
            graf_window_fraction: a.graf_window_fraction.unwrap_or(d.graf_window_fraction),
            aca_weights: AcaWeights {
                graf: a.aca_graf_weight.unwrap_or(d.aca_weights.graf),
                anterior: a.aca_anterior_weight.unwrap_or(d.aca_weights.anterior),
                posterior: a.aca_posterior_weight.unwrap_or(d.aca_weights.posterior),
            },
            max_femoral_head_asymmetry: a
                .max_femoral_head_asymmetry
                .unwrap_or(d.max_femoral_head_asymmetry),
            frame_filter: match a.filter_bad_frames {
                Some(false) => None,
                _ => d.frame_filter,
            },
            workers: b.workers.unwrap_or(d.workers),
            max_attempts: b.max_attempts.unwrap_or(d.max_attempts),
            job_timeout: b
                .job_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.job_timeout),
            input_extensions: b
                .input_extensions
                .as_ref()
                .map(|exts| {
                    exts.iter()
                        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                        .collect()
                })
                .unwrap_or(d.input_extensions),
            datasets: b.datasets.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.graf_window_fraction) {
            return Err(Error::Config(format!(
                "graf_window_fraction must be within [0, 0.5], got {}",
                self.graf_window_fraction
            )));
        }
        let w = &self.aca_weights;
        if w.graf <= 0.0 || w.anterior < 0.0 || w.posterior < 0.0 {
            return Err(Error::Config(
                "ACA weights must be non-negative and the Graf weight positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_femoral_head_asymmetry) {
            return Err(Error::Config(format!(
                "max_femoral_head_asymmetry must be within [0, 1], got {}",
                self.max_femoral_head_asymmetry
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.job_timeout.is_zero() {
            return Err(Error::Config("job_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn extraction_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            max_femoral_head_asymmetry: self.max_femoral_head_asymmetry,
        }
    }

    /// Whether `path` has one of the configured input extensions
    pub fn accepts(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.input_extensions.iter().any(|x| *x == e)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.graf_window_fraction, 0.05);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.job_timeout, Duration::from_secs(30));
        assert_eq!(config.frame_filter, Some(FrameFilter::default()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_empty_toml_is_default() {
        let config = AnalysisConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn test_from_toml_overlays_values() {
        let toml = TomlConfig::parse(
            r#"
            [analysis]
            name = "xray-ref"
            modality = "xray"
            aca_graf_weight = 0.5
            filter_bad_frames = false

            [batch]
            provider = "manual"
            workers = 2
            job_timeout_secs = 5
            input_extensions = [".PNG"]
            "#,
        )
        .unwrap();
        let config = AnalysisConfig::from_toml(&toml).unwrap();
        assert_eq!(config.name, "xray-ref");
        assert_eq!(config.modality, Modality::Xray);
        assert_eq!(config.aca_weights.graf, 0.5);
        assert_eq!(config.aca_weights.anterior, 0.2);
        assert!(config.frame_filter.is_none());
        assert_eq!(config.workers, 2);
        assert_eq!(config.job_timeout, Duration::from_secs(5));
        assert_eq!(config.input_extensions, vec!["png".to_string()]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let toml = TomlConfig::parse("[batch]\nworkers = 0\n").unwrap();
        assert!(matches!(AnalysisConfig::from_toml(&toml), Err(Error::Config(_))));

        let toml = TomlConfig::parse("[analysis]\nmodality = \"mri\"\n").unwrap();
        assert!(matches!(AnalysisConfig::from_toml(&toml), Err(Error::Config(_))));

        let toml = TomlConfig::parse("[analysis]\ngraf_window_fraction = 0.9\n").unwrap();
        assert!(AnalysisConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_accepts_extensions_case_insensitively() {
        let config = AnalysisConfig::default();
        assert!(config.accepts(Path::new("/data/a.DCM")));
        assert!(config.accepts(Path::new("b.png")));
        assert!(!config.accepts(Path::new("b.png.seg.json")));
        assert!(!config.accepts(Path::new("README")));
    }
}
