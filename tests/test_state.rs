use diffmut::mutants::{
    FileResult, Mutation, MutationCategory, MutationOutcome, MutationTestResult, PipelineResult,
    TokenUsage,
};
use diffmut::state;
use tempfile::TempDir;

fn result(id: &str, outcome: MutationOutcome) -> MutationTestResult {
    MutationTestResult {
        mutation: Mutation {
            id: id.into(),
            file_path: "src/calc.py".into(),
            start_line: 2,
            end_line: 2,
            original_code: "    return a + b".into(),
            mutated_code: "    return a - b".into(),
            description: "swap operator".into(),
            category: MutationCategory::ReturnValue,
        },
        outcome,
        duration_ms: 12,
        test_output: (outcome == MutationOutcome::Survived).then(|| "1 passed".to_string()),
    }
}

fn usage(total: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: total - total / 4,
        completion_tokens: total / 4,
        total_tokens: total,
    }
}

fn sample() -> PipelineResult {
    let files = vec![FileResult {
        file_path: "src/calc.py".into(),
        results: vec![
            result("mut-src-calc-py-1", MutationOutcome::Killed),
            result("mut-src-calc-py-2", MutationOutcome::Survived),
            result("mut-src-calc-py-3", MutationOutcome::NoCoverage),
            result("mut-src-calc-py-4", MutationOutcome::Timeout),
            result("mut-src-calc-py-5", MutationOutcome::Error),
        ],
        token_usage: usage(400),
    }];
    PipelineResult::aggregate(files, usage(400), 900)
}

// --- aggregation ---

#[test]
fn aggregate_counts_outcomes() {
    let result = sample();
    assert_eq!(result.total_mutations, 5);
    assert_eq!(result.killed, 1);
    assert_eq!(result.survived, 1);
    assert_eq!(result.no_coverage, 1);
    assert_eq!(result.timed_out, 1);
    assert_eq!(result.errors, 1);
}

#[test]
fn score_ignores_timeouts_and_errors() {
    let result = sample();
    assert!((result.mutation_score - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn score_is_100_without_testable_outcomes() {
    let files = vec![FileResult {
        file_path: "a.py".into(),
        results: vec![
            result("mut-a-py-1", MutationOutcome::Timeout),
            result("mut-a-py-2", MutationOutcome::Error),
        ],
        token_usage: TokenUsage::default(),
    }];
    let result = PipelineResult::aggregate(files, TokenUsage::default(), 0);
    assert_eq!(result.mutation_score, 100.0);
    assert_eq!(PipelineResult::empty(3).mutation_score, 100.0);
}

#[test]
fn survivors_lists_only_survived() {
    let result = sample();
    let ids: Vec<_> = result.survivors().map(|r| r.mutation.id.as_str()).collect();
    assert_eq!(ids, vec!["mut-src-calc-py-2"]);
}

#[test]
fn token_split_is_even_and_rounded() {
    let share = usage(400).split(3);
    assert_eq!(share.total_tokens, 133);
    assert_eq!(TokenUsage::default().split(0), TokenUsage::default());
}

// --- serialization ---

#[test]
fn pipeline_result_serializes_camel_case() {
    let json: serde_json::Value = serde_json::to_value(sample()).unwrap();
    assert_eq!(json["totalMutations"], 5);
    assert_eq!(json["noCoverage"], 1);
    assert_eq!(json["timedOut"], 1);
    assert_eq!(json["totalTokenUsage"]["totalTokens"], 400);

    let first = &json["fileResults"][0]["results"][0];
    assert_eq!(first["outcome"], "killed");
    assert_eq!(first["mutation"]["startLine"], 2);
    assert_eq!(first["mutation"]["category"], "return-value");
    assert!(first.get("testOutput").is_none());

    let survivor = &json["fileResults"][0]["results"][1];
    assert_eq!(survivor["testOutput"], "1 passed");
    assert_eq!(json["fileResults"][0]["results"][2]["outcome"], "no_coverage");
}

// --- state file ---

#[test]
fn save_and_load_last_run() {
    let dir = TempDir::new().unwrap();
    state::save_last_run(dir.path(), &sample());
    assert!(state::state_path(dir.path()).exists());

    let loaded = state::load_last_run(dir.path()).unwrap();
    assert_eq!(loaded.total_mutations, 5);
    assert_eq!(loaded.survivors().count(), 1);
    assert_eq!(loaded.file_results[0].results[3].outcome, MutationOutcome::Timeout);
}

#[test]
fn load_missing_state_returns_none() {
    let dir = TempDir::new().unwrap();
    assert!(state::load_last_run(dir.path()).is_none());
}

#[test]
fn load_corrupt_state_returns_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(state::load_from_path(&path).is_none());
}

#[test]
fn save_to_unwritable_path_is_silent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing-dir").join("state.json");
    state::save_to_path(&sample(), &path);
    assert!(!path.exists());
}
