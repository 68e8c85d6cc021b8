#![cfg(unix)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use diffmut::config::RunConfig;
use diffmut::diff::ChangedFile;
use diffmut::error::{Error, ProviderError, Result};
use diffmut::git::DiffSource;
use diffmut::mutants::{MutationCategory, MutationOutcome, TokenUsage};
use diffmut::pipeline::{self, Pipeline};
use diffmut::prompt::PromptOptions;
use diffmut::provider::{GenerationResult, MutationProvider};
use diffmut::retry::RetryPolicy;
use diffmut::validate::RawMutation;
use tempfile::TempDir;

const CALC: &str = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";

const CALC_DIFF: &str = concat!(
    "diff --git a/calc.py b/calc.py\n",
    "--- a/calc.py\n",
    "+++ b/calc.py\n",
    "@@ -1,5 +1,5 @@\n",
    " def add(a, b):\n",
    "-    return a\n",
    "+    return a + b\n",
    " \n",
    " def sub(a, b):\n",
    "-    return a\n",
    "+    return a - b\n",
);

struct FakeSource {
    root: PathBuf,
    diff: String,
    commits: String,
}

impl DiffSource for FakeSource {
    fn root(&self) -> Result<PathBuf> {
        Ok(self.root.clone())
    }

    fn diff(&self, _base: &str) -> Result<String> {
        Ok(self.diff.clone())
    }

    fn commit_messages(&self, _base: &str) -> String {
        self.commits.clone()
    }
}

/// Replays canned responses and records what it was asked.
struct ScriptedProvider {
    responses: RefCell<VecDeque<std::result::Result<GenerationResult, ProviderError>>>,
    calls: Cell<usize>,
    seen_commits: RefCell<Option<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<std::result::Result<GenerationResult, ProviderError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: Cell::new(0),
            seen_commits: RefCell::new(None),
        }
    }

    fn returning(mutations: Vec<RawMutation>) -> Self {
        Self::new(vec![Ok(generation(mutations))])
    }
}

impl MutationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_mutations(
        &self,
        _files: &[ChangedFile],
        _count: usize,
        options: &PromptOptions,
    ) -> std::result::Result<GenerationResult, ProviderError> {
        self.calls.set(self.calls.get() + 1);
        *self.seen_commits.borrow_mut() = options.commit_messages.clone();
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Malformed("script exhausted".into())))
    }
}

fn generation(mutations: Vec<RawMutation>) -> GenerationResult {
    GenerationResult {
        mutations,
        token_usage: TokenUsage {
            prompt_tokens: 80,
            completion_tokens: 20,
            total_tokens: 100,
        },
        retries: 0,
    }
}

fn raw(path: &str, line: usize, original: &str, mutated: &str) -> RawMutation {
    RawMutation {
        file_path: path.into(),
        start_line: line,
        end_line: line,
        original_code: original.into(),
        mutated_code: mutated.into(),
        description: "flip operator".into(),
        category: MutationCategory::ReturnValue,
    }
}

fn add_mutation() -> RawMutation {
    raw("calc.py", 2, "    return a + b", "    return a - b")
}

fn setup() -> (TempDir, FakeSource) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("calc.py"), CALC).unwrap();
    let source = FakeSource {
        root: dir.path().to_path_buf(),
        diff: CALC_DIFF.into(),
        commits: "Add calculator\n\nSupports add and sub.".into(),
    };
    (dir, source)
}

fn config(test_command: &str) -> RunConfig {
    RunConfig {
        test_command: Some(test_command.into()),
        timeout_secs: 30,
        ..RunConfig::default()
    }
}

fn instant_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter: Duration::ZERO,
    }
}

fn read(root: &Path) -> String {
    std::fs::read_to_string(root.join("calc.py")).unwrap()
}

// --- outcomes ---

#[test]
fn caught_mutation_scores_100() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = config("grep -q 'a + b' calc.py");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.total_mutations, 1);
    assert_eq!(result.killed, 1);
    assert_eq!(result.mutation_score, 100.0);
    let tested = &result.file_results[0].results[0];
    assert_eq!(tested.mutation.id, "mut-calc-py-1");
    assert_eq!(tested.outcome, MutationOutcome::Killed);
    assert!(tested.test_output.is_none());
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn surviving_mutation_scores_0() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = config("echo all good");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.survived, 1);
    assert_eq!(result.mutation_score, 0.0);
    let survivor = result.survivors().next().unwrap();
    assert_eq!(survivor.test_output.as_deref().map(str::trim), Some("all good"));
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn no_coverage_exit_code() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = config("grep -q 'a + b' calc.py || exit 5");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert_eq!(result.no_coverage, 1);
    assert_eq!(result.mutation_score, 0.0);
}

#[test]
fn hanging_tests_time_out() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let mut cfg = config("grep -q 'a + b' calc.py || sleep 30");
    cfg.timeout_secs = 1;

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.timed_out, 1);
    assert_eq!(result.total_mutations, 1);
    assert_eq!(result.mutation_score, 100.0);
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn hallucinated_original_code_is_an_error() {
    let (_dir, source) = setup();
    let provider =
        ScriptedProvider::returning(vec![raw("calc.py", 2, "return x * y", "return x / y")]);
    let cfg = config("true");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.errors, 1);
    assert_eq!(result.mutation_score, 100.0);
    let tested = &result.file_results[0].results[0];
    assert_eq!(tested.outcome, MutationOutcome::Error);
    assert!(tested.test_output.as_deref().unwrap().contains("hallucinated"));
}

// --- validation ---

#[test]
fn mutation_outside_diff_is_discarded() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![raw("calc.py", 10, "x", "y")]);
    let cfg = config("true");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert_eq!(result.total_mutations, 0);
    assert!(result.file_results.is_empty());
    assert_eq!(result.mutation_score, 100.0);
}

#[test]
fn accepted_mutations_are_capped_at_requested_count() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![
        add_mutation(),
        raw("calc.py", 5, "    return a - b", "    return a + b"),
        raw("calc.py", 2, "    return a + b", "    return b"),
    ]);
    let mut cfg = config("true");
    cfg.mutations = 2;

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert_eq!(result.total_mutations, 2);
    let ids: Vec<_> = result.file_results[0]
        .results
        .iter()
        .map(|r| r.mutation.id.as_str())
        .collect();
    assert_eq!(ids, vec!["mut-calc-py-1", "mut-calc-py-2"]);
}

#[test]
fn each_mutation_sees_only_its_own_edit() {
    let (dir, source) = setup();
    std::fs::write(dir.path().join("calc.orig"), CALC).unwrap();
    let provider = ScriptedProvider::returning(vec![
        add_mutation(),
        raw("calc.py", 5, "    return a - b", "    return a + b"),
    ]);
    let cfg = config(r#"[ "$(diff calc.orig calc.py | grep -c '^<')" -le 1 ]"#);

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.total_mutations, 2);
    assert_eq!(result.survived, 2);
    assert_eq!(read(dir.path()), CALC);
}

// --- run-level behaviour ---

#[test]
fn failing_preflight_aborts_before_generation() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = config("echo broken; exit 1");

    let err = pipeline::run_pipeline(&cfg, &source, &provider).unwrap_err();

    assert!(matches!(err, Error::Preflight { .. }));
    assert_eq!(provider.calls.get(), 0);
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn empty_diff_skips_everything() {
    let (_dir, mut source) = setup();
    source.diff = String::new();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = config("exit 1");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert_eq!(result.total_mutations, 0);
    assert_eq!(result.mutation_score, 100.0);
    assert_eq!(provider.calls.get(), 0);
}

#[test]
fn dry_run_reports_survived_without_running_tests() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = RunConfig {
        dry_run: true,
        ..RunConfig::default()
    };

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.survived, 1);
    let tested = &result.file_results[0].results[0];
    assert_eq!(tested.duration_ms, 0);
    assert!(tested.test_output.is_none());
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn missing_test_command_is_fatal() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![add_mutation()]);
    let cfg = RunConfig::default();

    let err = pipeline::run_pipeline(&cfg, &source, &provider).unwrap_err();
    assert!(matches!(err, Error::MissingTestCommand));
}

#[test]
fn commit_messages_sent_only_when_enabled() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::returning(vec![]);
    let mut cfg = config("true");
    pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert!(provider.seen_commits.borrow().is_none());

    let provider = ScriptedProvider::returning(vec![]);
    cfg.commit_context = true;
    pipeline::run_pipeline(&cfg, &source, &provider).unwrap();
    assert_eq!(
        provider.seen_commits.borrow().as_deref(),
        Some("Add calculator\n\nSupports add and sub.")
    );
}

#[test]
fn token_usage_is_split_across_files() {
    let (dir, mut source) = setup();
    std::fs::write(dir.path().join("util.py"), "def one():\n    return 1\n").unwrap();
    source.diff.push_str(
        "\
diff --git a/util.py b/util.py
--- /dev/null
+++ b/util.py
@@ -0,0 +1,2 @@
+def one():
+    return 1
",
    );
    let provider = ScriptedProvider::returning(vec![
        add_mutation(),
        raw("util.py", 2, "    return 1", "    return 0"),
    ]);
    let cfg = config("true");

    let result = pipeline::run_pipeline(&cfg, &source, &provider).unwrap();

    assert_eq!(result.file_results.len(), 2);
    assert_eq!(result.file_results[0].file_path, "calc.py");
    assert_eq!(result.file_results[1].file_path, "util.py");
    assert_eq!(result.file_results[0].token_usage.total_tokens, 50);
    assert_eq!(result.file_results[1].token_usage.total_tokens, 50);
    assert_eq!(result.total_token_usage.total_tokens, 100);
}

// --- retries ---

#[test]
fn transient_provider_errors_are_retried() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Status {
            status: 503,
            message: "overloaded".into(),
        }),
        Err(ProviderError::Connection("reset".into())),
        Ok(generation(vec![add_mutation()])),
    ]);
    let cfg = config("true");

    let result = Pipeline::new(&cfg, &source, &provider)
        .with_retry_policy(instant_retries(2))
        .run()
        .unwrap();

    assert_eq!(provider.calls.get(), 3);
    assert_eq!(result.total_mutations, 1);
}

#[test]
fn retries_are_bounded() {
    let (_dir, source) = setup();
    let overloaded = || -> std::result::Result<GenerationResult, ProviderError> {
        Err(ProviderError::Status {
            status: 529,
            message: "overloaded".into(),
        })
    };
    let provider = ScriptedProvider::new(vec![overloaded(), overloaded(), overloaded()]);
    let cfg = config("true");

    let err = Pipeline::new(&cfg, &source, &provider)
        .with_retry_policy(instant_retries(1))
        .run()
        .unwrap_err();

    assert_eq!(provider.calls.get(), 2);
    assert!(matches!(err, Error::Provider(ProviderError::Status { status: 529, .. })));
}

#[test]
fn fatal_provider_errors_are_not_retried() {
    let (dir, source) = setup();
    let provider = ScriptedProvider::new(vec![Err(ProviderError::Status {
        status: 401,
        message: "bad key".into(),
    })]);
    let cfg = config("true");

    let err = Pipeline::new(&cfg, &source, &provider)
        .with_retry_policy(instant_retries(3))
        .run()
        .unwrap_err();

    assert_eq!(provider.calls.get(), 1);
    assert!(matches!(err, Error::Provider(ProviderError::Status { status: 401, .. })));
    assert_eq!(read(dir.path()), CALC);
}

#[test]
fn retry_predicate_is_replaceable() {
    let (_dir, source) = setup();
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Malformed("truncated".into())),
        Ok(generation(vec![add_mutation()])),
    ]);
    let cfg = config("true");

    let result = Pipeline::new(&cfg, &source, &provider)
        .with_retry_policy(instant_retries(2))
        .with_retry_predicate(|e| matches!(e, ProviderError::Malformed(_)))
        .run()
        .unwrap();

    assert_eq!(provider.calls.get(), 2);
    assert_eq!(result.total_mutations, 1);
}
