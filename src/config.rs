//! Run configuration: defaults, an optional `.diffmut.toml`, then CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diff::DiffOptions;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = ".diffmut.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub diff_base: String,
    pub test_command: Option<String>,
    /// Total mutations requested across all changed files.
    pub mutations: usize,
    /// Per test run.
    pub timeout_secs: u64,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_tests: bool,
    pub dry_run: bool,
    pub type_checked: bool,
    /// Send the commit messages of the diff range along with the code.
    pub commit_context: bool,
    pub provider_command: Option<String>,
    pub provider_timeout_secs: u64,
    pub max_retries: u32,
    pub fail_on_survived: bool,
    pub output: OutputFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            diff_base: "origin/main".into(),
            test_command: None,
            mutations: 5,
            timeout_secs: 300,
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_tests: true,
            dry_run: false,
            type_checked: false,
            commit_context: false,
            provider_command: None,
            provider_timeout_secs: 600,
            max_retries: 2,
            fail_on_survived: false,
            output: OutputFormat::Text,
        }
    }
}

impl RunConfig {
    /// Load `explicit` if given, else the nearest `.diffmut.toml` at or above
    /// `start`, else defaults.
    pub fn load(explicit: Option<&Path>, start: &Path) -> Result<Self> {
        match explicit.map(Path::to_path_buf).or_else(|| discover(start)) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&data, path)
    }

    pub fn from_toml(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reject values no run could work with.
    pub fn validate(&self, source: &Path) -> Result<()> {
        let invalid = |message: &str| Error::Config {
            path: source.to_path_buf(),
            message: message.to_string(),
        };
        if self.mutations == 0 {
            return Err(invalid("mutations must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be at least 1"));
        }
        if !self.dry_run && self.test_command.as_deref().is_none_or(|c| c.trim().is_empty()) {
            return Err(Error::MissingTestCommand);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            base_ref: self.diff_base.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            exclude_tests: self.exclude_tests,
        }
    }
}

/// Nearest config file at or above `start`.
pub fn discover(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
