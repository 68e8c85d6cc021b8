//! Mutation generation providers.
//!
//! A provider turns changed files into untrusted mutation candidates. How it
//! talks to a model is its own business; the pipeline validates everything it
//! returns before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diff::ChangedFile;
use crate::error::ProviderError;
use crate::mutants::TokenUsage;
use crate::prompt::{self, PromptMessage, PromptOptions};
use crate::runner::{self, ExecOptions};
use crate::validate::RawMutation;

#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    pub mutations: Vec<RawMutation>,
    pub token_usage: TokenUsage,
    /// Retries the provider performed internally.
    pub retries: u32,
}

pub trait MutationProvider {
    fn name(&self) -> &str;

    /// Propose up to `count` mutations spread across `files`.
    fn generate_mutations(
        &self,
        files: &[ChangedFile],
        count: usize,
        options: &PromptOptions,
    ) -> Result<GenerationResult, ProviderError>;
}

/// What a provider command receives on stdin.
#[derive(Debug, Serialize)]
pub struct ProviderRequest<'a> {
    pub messages: &'a [PromptMessage],
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResponse {
    #[serde(default)]
    mutations: Vec<serde_json::Value>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: u16,
    #[serde(default)]
    message: String,
}

/// Provider backed by an external command, such as a small script wrapping a
/// model API.
///
/// The command reads a JSON [`ProviderRequest`] on stdin and prints
/// `{"mutations": [...], "usage": {...}}`. To report an API failure it exits
/// non-zero and prints `{"error": {"status": 429, "message": "..."}}`.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    command: String,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl MutationProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.command
    }

    fn generate_mutations(
        &self,
        files: &[ChangedFile],
        count: usize,
        options: &PromptOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let messages = prompt::build_prompt(files, count, options);
        let request = serde_json::to_string(&ProviderRequest {
            messages: &messages,
            count,
        })
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let exec = ExecOptions::new(self.timeout).full_output();
        let result = runner::run_shell(&self.command, &exec, Some(&request));

        if result.timed_out {
            return Err(ProviderError::Connection(format!(
                "provider command timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !result.passed {
            return Err(classify_failure(result.exit_code, &result.stdout, &result.stderr));
        }
        parse_response(&result.stdout)
    }
}

fn classify_failure(code: Option<i32>, stdout: &str, stderr: &str) -> ProviderError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(stdout.trim()) {
        return ProviderError::Status {
            status: envelope.error.status,
            message: envelope.error.message,
        };
    }
    let text = format!("{stdout}\n{stderr}");
    let connection_markers = ["ECONNRESET", "ETIMEDOUT", "Connection reset"];
    if connection_markers.iter().any(|marker| text.contains(marker)) {
        return ProviderError::Connection(stderr.trim().to_string());
    }
    ProviderError::Command {
        code,
        stderr: stderr.trim().to_string(),
    }
}

/// Decode a provider response. Individual candidates that fail to decode
/// are dropped; a response that is not JSON at all yields no mutations.
pub fn parse_response(stdout: &str) -> Result<GenerationResult, ProviderError> {
    let response: ProviderResponse = match serde_json::from_str(stdout.trim()) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "provider output is not valid JSON, no mutations generated");
            return Ok(GenerationResult::default());
        }
    };

    let mutations = response
        .mutations
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawMutation>(value) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed mutation candidate");
                None
            }
        })
        .collect();

    Ok(GenerationResult {
        mutations,
        token_usage: response.usage.unwrap_or_default(),
        retries: 0,
    })
}
