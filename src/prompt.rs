//! Prompt construction for mutation generation.
//!
//! Each changed file is rendered with line numbers and a `[CHANGED]` or
//! `[CONTEXT]` tag per line. Large files are cut down to windows around their
//! hunks, widened to the enclosing function where one can be found, so the
//! prompt grows with the diff rather than with the file.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diff::ChangedFile;

/// Files at or under this many lines are rendered whole.
pub const MAX_ANNOTATED_LINES: usize = 500;
/// Lines of context kept on each side of a hunk in large files.
pub const CONTEXT_LINES_AROUND_HUNK: usize = 30;
/// Leading lines always shown (imports, module declarations).
pub const HEADER_LINES: usize = 10;
/// Bound on each direction of the function-boundary scan.
pub const MAX_EXPANSION: usize = 100;

const SYSTEM_PROMPT: &str = "\
You are a mutation testing expert. Generate small, realistic code mutations that probe how well a project's test suite guards its behavior.

A good mutation:
- Changes BEHAVIOR in a way a well-written test should detect
- Is syntactically valid and would compile or run
- Looks like a mistake a real developer could make
- Stays within the lines marked [CHANGED]

A bad mutation:
- Deletes whole functions or blocks
- Introduces syntax errors
- Touches only comments, whitespace or formatting
- Edits lines marked [CONTEXT]
- Is equivalent to the original code

Categories:
- boundary-condition: < vs <=, > vs >=
- logical-operator: && vs ||, negated conditions
- null-safety: removed null checks, altered defaulting
- error-handling: swallowed errors, removed handlers
- return-value: wrong or early return values
- conditional-logic: inverted branches, removed else arms
- off-by-one: loop bounds, indices
- string-manipulation: string comparisons, patterns
- type-coercion: strict vs loose equality, removed type guards
- api-contract: swapped parameters, altered signatures

Rules:
1. Mutate ONLY lines marked [CHANGED].
2. originalCode must match the file content EXACTLY, including indentation.
3. startLine and endLine are 1-based and inclusive.
4. Describe what each mutation tests.
5. Produce the requested number of mutations, or fewer if the diff is too small.
6. Prefer a spread of categories over repeats of one.
7. Reason about semantics, not just syntax.
8. Every mutation must carry the filePath of the file it targets.

First identify the behavioral invariants the changed code must uphold, then break them in subtle, plausible ways: domain edge cases, silent logic inversions, mishandled error paths.

Respond with JSON: {\"mutations\": [{\"filePath\", \"startLine\", \"endLine\", \"originalCode\", \"mutatedCode\", \"description\", \"category\"}]}";

const TYPE_CHECKED_SECTION: &str = "

This project is statically type checked. Every mutation MUST still pass the type checker. Do not:
- change type annotations without changing runtime behavior
- assign values of incompatible types
- remove type guards the checker relies on
- produce anything that fails compilation
Target bugs that are type-correct but semantically wrong.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Add the stricter rules for type-checked codebases.
    pub type_checked: bool,
    /// Commit-message digest describing the intent of the change.
    pub commit_messages: Option<String>,
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function\s+\w+|class\s+\w+|(?:const|let|var)\s+\w+\s*=\s*(?:async\s+)?\(|(?:public|private|protected|static|\w+)\s*\(|def\s+\w+|fn\s+\w+)",
        )
        .expect("declaration regex")
    })
}

/// Split a sorted line set into maximal runs of consecutive numbers.
fn contiguous_ranges(lines: &BTreeSet<usize>) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &n in lines {
        match ranges.last_mut() {
            Some((_, end)) if n == *end + 1 => *end = n,
            _ => ranges.push((n, n)),
        }
    }
    ranges
}

/// Widen each visible window to the function or class enclosing it.
///
/// Upward, the nearest declaration-like line within [`MAX_EXPANSION`] lines
/// becomes the new start. Downward, braces are counted from that start until
/// depth returns to zero at or past the window end. If either scan fails the
/// window stays as it was. `lines` is 0-indexed; line numbers are 1-based.
pub fn expand_to_function_boundaries(lines: &[&str], visible: &BTreeSet<usize>) -> BTreeSet<usize> {
    let mut expanded = visible.clone();

    for (start, end) in contiguous_ranges(visible) {
        let lower = start.saturating_sub(MAX_EXPANSION).max(1);
        let Some(func_start) = (lower..start)
            .rev()
            .find(|&i| lines.get(i - 1).is_some_and(|l| declaration_re().is_match(l)))
        else {
            continue;
        };

        let upper = lines.len().min(end + MAX_EXPANSION);
        let mut depth: i64 = 0;
        let mut func_end = None;
        for i in func_start..=upper {
            for ch in lines[i - 1].chars() {
                match ch {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if i >= end && depth <= 0 {
                func_end = Some(i);
                break;
            }
        }
        let Some(func_end) = func_end else {
            continue;
        };

        expanded.extend(func_start..=func_end);
    }
    expanded
}

fn render_line(n: usize, line: &str, changed: &BTreeSet<usize>) -> String {
    let tag = if changed.contains(&n) { "[CHANGED]" } else { "[CONTEXT]" };
    format!("{n:>4} {tag} {line}")
}

fn omitted(count: usize) -> String {
    format!("     ... ({count} lines omitted) ...")
}

/// Render `file` as line-numbered, CHANGED/CONTEXT-annotated text.
pub fn build_annotated_content(file: &ChangedFile) -> String {
    let lines: Vec<&str> = file.current_content.split('\n').collect();
    let changed = file.changed_lines();

    if lines.len() <= MAX_ANNOTATED_LINES {
        return lines
            .iter()
            .enumerate()
            .map(|(i, line)| render_line(i + 1, line, &changed))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let total = lines.len();
    let mut visible = BTreeSet::new();
    for hunk in &file.hunks {
        let from = hunk.start_line.saturating_sub(CONTEXT_LINES_AROUND_HUNK).max(1);
        let to = total.min(hunk.end_line() + CONTEXT_LINES_AROUND_HUNK);
        visible.extend(from..=to);
    }
    visible.extend(1..=total.min(HEADER_LINES));

    let shown = expand_to_function_boundaries(&lines, &visible);

    let mut out = Vec::new();
    let mut last_shown = 0;
    for &n in shown.iter().filter(|&&n| n <= total) {
        if last_shown > 0 && n - last_shown > 1 {
            out.push(omitted(n - last_shown - 1));
        }
        out.push(render_line(n, lines[n - 1], &changed));
        last_shown = n;
    }
    if last_shown < total {
        out.push(omitted(total - last_shown));
    }
    out.join("\n")
}

/// Assemble the system and user messages for one batched request covering
/// every file, asking for `total_count` mutations in all.
pub fn build_prompt(
    files: &[ChangedFile],
    total_count: usize,
    options: &PromptOptions,
) -> Vec<PromptMessage> {
    let file_sections = files
        .iter()
        .map(|file| {
            let lang = file.language_tag();
            format!(
                "=== File: {} ({lang}) ===\n\n```{lang}\n{}\n```",
                file.file_path,
                build_annotated_content(file)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut system = SYSTEM_PROMPT.to_string();
    if options.type_checked {
        system.push_str(TYPE_CHECKED_SECTION);
    }

    let commit_section = match options.commit_messages.as_deref() {
        Some(messages) if !messages.trim().is_empty() => format!(
            "## PR Context: Commit Messages\n{messages}\n\n\
             Use these commit messages to understand the intent of the changes. \
             Focus mutations on the behavioral invariants they introduce or modify.\n\n"
        ),
        _ => String::new(),
    };

    let user = format!(
        "{commit_section}Below are all changed files. Lines tagged [CHANGED] are within the diff and eligible for mutation. \
         Lines tagged [CONTEXT] are surrounding context and must NOT be mutated.\n\n\
         {file_sections}\n\n\
         Generate exactly {total_count} mutations across all files above. Distribute them by complexity and risk. \
         Each mutation must include a filePath matching one of the file paths above."
    );

    vec![
        PromptMessage {
            role: Role::System,
            content: system,
        },
        PromptMessage {
            role: Role::User,
            content: user,
        },
    ]
}
