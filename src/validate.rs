//! Turning untrusted provider candidates into [`Mutation`]s.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diff::ChangedFile;
use crate::mutants::{Mutation, MutationCategory};

/// A mutation exactly as a provider proposed it. Nothing here is trusted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMutation {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub original_code: String,
    pub mutated_code: String,
    #[serde(default)]
    pub description: String,
    pub category: MutationCategory,
}

/// Run-scoped source of mutation ids. A fresh sequence starts at 1.
#[derive(Debug, Default)]
pub struct IdSequence {
    last: u64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, file_path: &str) -> String {
        self.last += 1;
        format!("mut-{}-{}", sanitize(file_path), self.last)
    }
}

fn sanitize(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim();
    trimmed.strip_prefix("./").unwrap_or(trimmed)
}

/// True when `[start_line, end_line]` contains at least one changed line of `file`.
pub fn is_within_diff_bounds(start_line: usize, end_line: usize, file: &ChangedFile) -> bool {
    if start_line > end_line {
        return false;
    }
    file.changed_lines().range(start_line..=end_line).next().is_some()
}

/// Keep the candidates addressed to a known file, overlapping its changed
/// lines, and actually changing code. Survivors get ids in input order.
pub fn filter_and_map(
    candidates: Vec<RawMutation>,
    files: &[ChangedFile],
    ids: &mut IdSequence,
) -> Vec<Mutation> {
    let by_path: HashMap<&str, &ChangedFile> = files
        .iter()
        .map(|f| (normalize_path(&f.file_path), f))
        .collect();

    let mut accepted = Vec::with_capacity(candidates.len());
    for raw in candidates {
        let Some(file) = by_path.get(normalize_path(&raw.file_path)) else {
            tracing::debug!(path = %raw.file_path, "discarding mutation for unknown file");
            continue;
        };
        if !is_within_diff_bounds(raw.start_line, raw.end_line, file) {
            tracing::debug!(
                path = %raw.file_path,
                start = raw.start_line,
                end = raw.end_line,
                "discarding mutation outside diff bounds"
            );
            continue;
        }
        if raw.original_code == raw.mutated_code {
            tracing::debug!(
                path = %raw.file_path,
                line = raw.start_line,
                "discarding equivalent mutation"
            );
            continue;
        }
        accepted.push(Mutation {
            id: ids.next_id(&file.file_path),
            file_path: file.file_path.clone(),
            start_line: raw.start_line,
            end_line: raw.end_line,
            original_code: raw.original_code,
            mutated_code: raw.mutated_code,
            description: raw.description,
            category: raw.category,
        });
    }
    accepted
}
