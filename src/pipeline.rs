//! The mutation-testing run: diff, preflight, generation, per-file testing,
//! aggregation. Every file touched is restored before `run` returns, on
//! success and on error alike.

use std::path::Path;
use std::time::Instant;

use crate::config::RunConfig;
use crate::diff::{self, ChangedFile};
use crate::error::{Error, ProviderError, Result};
use crate::git::DiffSource;
use crate::mutants::{
    FileResult, Mutation, MutationOutcome, MutationTestResult, PipelineResult, TokenUsage,
};
use crate::prompt::PromptOptions;
use crate::provider::{GenerationResult, MutationProvider};
use crate::retry::{self, RetryPolicy};
use crate::runner;
use crate::safety::FileManager;
use crate::validate::{self, IdSequence};

const HALLUCINATION_MESSAGE: &str = "Original code mismatch: the provider hallucinated the original code";

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    source: &'a dyn DiffSource,
    provider: &'a dyn MutationProvider,
    retry: RetryPolicy,
    should_retry: Box<dyn Fn(&ProviderError) -> bool + 'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        source: &'a dyn DiffSource,
        provider: &'a dyn MutationProvider,
    ) -> Self {
        Self {
            config,
            source,
            provider,
            retry: config.retry_policy(),
            should_retry: Box::new(ProviderError::is_transient),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Replace the predicate deciding which provider errors are retried.
    pub fn with_retry_predicate(mut self, predicate: impl Fn(&ProviderError) -> bool + 'a) -> Self {
        self.should_retry = Box::new(predicate);
        self
    }

    pub fn run(&self) -> Result<PipelineResult> {
        let start = Instant::now();
        let root = self.source.root()?;
        let mut files = FileManager::new();
        let result = self.run_stages(&root, &mut files, start);
        files.restore_all();
        result
    }

    fn run_stages(
        &self,
        root: &Path,
        files: &mut FileManager,
        start: Instant,
    ) -> Result<PipelineResult> {
        let config = self.config;

        tracing::info!(base = %config.diff_base, "extracting diff");
        let diff = diff::extract_diff(self.source, &config.diff_options())?;
        if diff.files.is_empty() {
            tracing::info!("no changed files found, nothing to mutate");
            return Ok(PipelineResult::empty(elapsed_ms(start)));
        }
        tracing::info!(files = diff.files.len(), "found changed files");

        if !config.dry_run {
            tracing::info!("running pre-flight tests");
            runner::run_preflight(self.test_command()?, root, config.timeout())?;
            tracing::info!("pre-flight passed");
        }

        let options = PromptOptions {
            type_checked: config.type_checked,
            commit_messages: config
                .commit_context
                .then(|| self.source.commit_messages(&config.diff_base)),
        };
        tracing::info!(
            count = config.mutations,
            provider = self.provider.name(),
            "generating mutations"
        );
        let (generation, retries) = self.generate(&diff.files, &options)?;

        let mut ids = IdSequence::new();
        let mut mutations = validate::filter_and_map(generation.mutations, &diff.files, &mut ids);
        mutations.truncate(config.mutations);
        tracing::info!(accepted = mutations.len(), retries, "mutations ready");

        let groups = group_by_file(mutations);
        let share = generation.token_usage.split(groups.len());

        let mut file_results = Vec::with_capacity(groups.len());
        for (path, file_mutations) in groups {
            let Some(file) = diff.files.iter().find(|f| f.file_path == path) else {
                continue;
            };
            tracing::info!(path = %path, mutations = file_mutations.len(), "testing file");
            file_results.push(self.test_file(file, file_mutations, root, files, share)?);
        }

        Ok(PipelineResult::aggregate(
            file_results,
            generation.token_usage,
            elapsed_ms(start),
        ))
    }

    fn test_command(&self) -> Result<&str> {
        self.config
            .test_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(Error::MissingTestCommand)
    }

    /// One batched provider call, retried on transient failures.
    fn generate(
        &self,
        files: &[ChangedFile],
        options: &PromptOptions,
    ) -> Result<(GenerationResult, u32)> {
        let (generation, retried) = retry::with_retry(
            &self.retry,
            |e| (self.should_retry)(e),
            || self.provider.generate_mutations(files, self.config.mutations, options),
        )?;
        let retries = retried + generation.retries;
        Ok((generation, retries))
    }

    /// Test one file's mutations strictly one at a time; the file is restored
    /// after each so no mutation sees another's edits.
    fn test_file(
        &self,
        file: &ChangedFile,
        mutations: Vec<Mutation>,
        root: &Path,
        files: &mut FileManager,
        token_usage: TokenUsage,
    ) -> Result<FileResult> {
        if self.config.dry_run {
            let results = mutations
                .into_iter()
                .map(|mutation| MutationTestResult {
                    mutation,
                    outcome: MutationOutcome::Survived,
                    duration_ms: 0,
                    test_output: None,
                })
                .collect();
            return Ok(FileResult {
                file_path: file.file_path.clone(),
                results,
                token_usage,
            });
        }

        let command = self.test_command()?;
        let abs = root.join(&file.file_path);
        files.backup(&abs)?;

        let mut results = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            if !runner::validate_original_code(&file.current_content, &mutation) {
                tracing::warn!(id = %mutation.id, "skipping mutation: original code mismatch");
                results.push(MutationTestResult {
                    mutation,
                    outcome: MutationOutcome::Error,
                    duration_ms: 0,
                    test_output: Some(HALLUCINATION_MESSAGE.to_string()),
                });
                continue;
            }

            let result = self.test_mutation(file, mutation, command, &abs, root, files);
            files.restore(&abs)?;
            results.push(result);
        }

        Ok(FileResult {
            file_path: file.file_path.clone(),
            results,
            token_usage,
        })
    }

    fn test_mutation(
        &self,
        file: &ChangedFile,
        mutation: Mutation,
        command: &str,
        abs: &Path,
        root: &Path,
        files: &FileManager,
    ) -> MutationTestResult {
        let mutated = runner::apply_mutation_to_content(&file.current_content, &mutation);
        if let Err(e) = files.apply_mutation(abs, &mutated) {
            return MutationTestResult {
                mutation,
                outcome: MutationOutcome::Error,
                duration_ms: 0,
                test_output: Some(e.to_string()),
            };
        }

        let execution = runner::execute_tests(command, root, self.config.timeout());
        let outcome = runner::classify_outcome(&execution);
        tracing::info!(
            id = %mutation.id,
            outcome = outcome.as_str(),
            duration_ms = execution.duration_ms,
            "mutation tested"
        );

        let test_output = (outcome == MutationOutcome::Survived).then_some(execution.stdout);
        MutationTestResult {
            mutation,
            outcome,
            duration_ms: execution.duration_ms,
            test_output,
        }
    }
}

/// Run the whole pipeline with the default retry behaviour.
pub fn run_pipeline(
    config: &RunConfig,
    source: &dyn DiffSource,
    provider: &dyn MutationProvider,
) -> Result<PipelineResult> {
    Pipeline::new(config, source, provider).run()
}

/// Group mutations by file, files in first-seen order, mutations in input order.
fn group_by_file(mutations: Vec<Mutation>) -> Vec<(String, Vec<Mutation>)> {
    let mut groups: Vec<(String, Vec<Mutation>)> = Vec::new();
    for mutation in mutations {
        match groups.iter_mut().find(|(path, _)| *path == mutation.file_path) {
            Some((_, group)) => group.push(mutation),
            None => groups.push((mutation.file_path.clone(), vec![mutation])),
        }
    }
    groups
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutants::MutationCategory;

    fn mutation(path: &str, id: &str) -> Mutation {
        Mutation {
            id: id.into(),
            file_path: path.into(),
            start_line: 1,
            end_line: 1,
            original_code: "a".into(),
            mutated_code: "b".into(),
            description: String::new(),
            category: MutationCategory::ReturnValue,
        }
    }

    #[test]
    fn grouping_keeps_first_seen_file_order() {
        let groups = group_by_file(vec![
            mutation("b.py", "1"),
            mutation("a.py", "2"),
            mutation("b.py", "3"),
        ]);
        let paths: Vec<_> = groups.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["b.py", "a.py"]);
        let ids: Vec<_> = groups[0].1.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
