use std::path::{Path, PathBuf};

use crate::mutants::PipelineResult;

pub const STATE_FILE_NAME: &str = ".diffmut-state.json";

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE_NAME)
}

/// Remember the last run for `diffmut status`. Failures are not worth
/// failing a finished run over.
pub fn save_last_run(root: &Path, result: &PipelineResult) {
    save_to_path(result, &state_path(root));
}

pub fn load_last_run(root: &Path) -> Option<PipelineResult> {
    load_from_path(&state_path(root))
}

pub fn save_to_path(result: &PipelineResult, path: &Path) {
    match serde_json::to_string(result) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::debug!(path = %path.display(), error = %e, "could not save run state");
            }
        }
        Err(e) => tracing::debug!(error = %e, "could not serialize run state"),
    }
}

pub fn load_from_path(path: &Path) -> Option<PipelineResult> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
