//! Result files
//!
//! One JSON document per job with a result, stored under the results
//! folder at the input's own path so inputs sharing a file name never
//! overwrite each other.

use std::path::{Component, Path, PathBuf};

use hipm_common::Result;
use tracing::debug;

use crate::batch::BatchJob;
use crate::config::AnalysisConfig;

/// Location of the record file for `input_id` below `dir`
///
/// The input path is mirrored below `dir` (root and drive prefix dropped,
/// `..` spelled `_parent`) with `.json` appended, so distinct inputs map to
/// distinct files that always stay inside `dir`.
pub fn record_path(dir: &Path, input_id: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    let mut name: Option<String> = None;
    for component in Path::new(input_id).components() {
        let part = match component {
            Component::Normal(part) => part.to_string_lossy().into_owned(),
            Component::ParentDir => "_parent".to_string(),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => continue,
        };
        if let Some(parent) = name.replace(part) {
            path.push(parent);
        }
    }
    path.join(format!("{}.json", name.unwrap_or_else(|| "input".to_string())))
}

/// Write the job's record, if it has one, and return where it went
///
/// The serialized record gains `input_id` and `state` keys.
pub fn write_result(dir: &Path, job: &BatchJob, config: &AnalysisConfig) -> Result<Option<PathBuf>> {
    let Some(record) = job.result() else {
        return Ok(None);
    };

    let mut value = record.serialize(config, None)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("input_id".to_string(), job.input_id.clone().into());
        map.insert("state".to_string(), job.state.as_str().into());
    }

    let path = record_path(dir, &job.input_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
    debug!(input_id = %job.input_id, path = %path.display(), "Result written");
    Ok(Some(path))
}
