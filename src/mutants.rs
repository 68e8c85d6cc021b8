use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationCategory {
    BoundaryCondition,
    LogicalOperator,
    NullSafety,
    ErrorHandling,
    ReturnValue,
    ConditionalLogic,
    OffByOne,
    StringManipulation,
    TypeCoercion,
    ApiContract,
}

impl MutationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationCategory::BoundaryCondition => "boundary-condition",
            MutationCategory::LogicalOperator => "logical-operator",
            MutationCategory::NullSafety => "null-safety",
            MutationCategory::ErrorHandling => "error-handling",
            MutationCategory::ReturnValue => "return-value",
            MutationCategory::ConditionalLogic => "conditional-logic",
            MutationCategory::OffByOne => "off-by-one",
            MutationCategory::StringManipulation => "string-manipulation",
            MutationCategory::TypeCoercion => "type-coercion",
            MutationCategory::ApiContract => "api-contract",
        }
    }
}

/// A validated mutation, confined to the changed lines of its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    /// Inclusive.
    pub end_line: usize,
    pub original_code: String,
    pub mutated_code: String,
    pub description: String,
    pub category: MutationCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Killed,
    Survived,
    NoCoverage,
    Timeout,
    Error,
}

impl MutationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationOutcome::Killed => "killed",
            MutationOutcome::Survived => "survived",
            MutationOutcome::NoCoverage => "no_coverage",
            MutationOutcome::Timeout => "timeout",
            MutationOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationTestResult {
    pub mutation: Mutation,
    pub outcome: MutationOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Even share of this usage across `parts` files, rounded.
    pub fn split(&self, parts: usize) -> TokenUsage {
        if parts == 0 {
            return TokenUsage::default();
        }
        let share = |n: u64| (n as f64 / parts as f64).round() as u64;
        TokenUsage {
            prompt_tokens: share(self.prompt_tokens),
            completion_tokens: share(self.completion_tokens),
            total_tokens: share(self.total_tokens),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_path: String,
    pub results: Vec<MutationTestResult>,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub total_mutations: usize,
    pub killed: usize,
    pub survived: usize,
    pub no_coverage: usize,
    pub timed_out: usize,
    pub errors: usize,
    pub mutation_score: f64,
    pub file_results: Vec<FileResult>,
    pub total_token_usage: TokenUsage,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Result of a run that found nothing to mutate.
    pub fn empty(duration_ms: u64) -> Self {
        PipelineResult {
            mutation_score: 100.0,
            duration_ms,
            ..Default::default()
        }
    }

    /// Tally outcomes across files. The score counts only testable outcomes
    /// (killed, survived, no coverage) and is 100 when there are none.
    pub fn aggregate(
        file_results: Vec<FileResult>,
        total_token_usage: TokenUsage,
        duration_ms: u64,
    ) -> Self {
        let (mut killed, mut survived, mut no_coverage, mut timed_out, mut errors) =
            (0, 0, 0, 0, 0);
        for result in file_results.iter().flat_map(|f| &f.results) {
            match result.outcome {
                MutationOutcome::Killed => killed += 1,
                MutationOutcome::Survived => survived += 1,
                MutationOutcome::NoCoverage => no_coverage += 1,
                MutationOutcome::Timeout => timed_out += 1,
                MutationOutcome::Error => errors += 1,
            }
        }
        let testable = killed + survived + no_coverage;
        let mutation_score = if testable > 0 {
            killed as f64 / testable as f64 * 100.0
        } else {
            100.0
        };
        PipelineResult {
            total_mutations: killed + survived + no_coverage + timed_out + errors,
            killed,
            survived,
            no_coverage,
            timed_out,
            errors,
            mutation_score,
            file_results,
            total_token_usage,
            duration_ms,
        }
    }

    pub fn survivors(&self) -> impl Iterator<Item = &MutationTestResult> {
        self.file_results
            .iter()
            .flat_map(|f| &f.results)
            .filter(|r| r.outcome == MutationOutcome::Survived)
    }
}
