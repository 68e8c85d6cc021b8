//! Changed-line extraction from unified diffs.
//!
//! Only added lines are recorded: they are the code that exists in the
//! working tree and can be mutated. Line numbers refer to the new file.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;

use crate::error::{Error, Result};
use crate::git::DiffSource;
use crate::test_patterns;
use crate::{Language, detect_language};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedLine {
    pub line_number: usize,
    pub content: String,
    pub kind: LineKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedHunk {
    pub start_line: usize,
    pub line_count: usize,
    pub lines: Vec<ChangedLine>,
}

impl ChangedHunk {
    /// Last changed line of the hunk (inclusive).
    pub fn end_line(&self) -> usize {
        self.start_line + self.line_count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub file_path: String,
    pub current_content: String,
    pub hunks: Vec<ChangedHunk>,
    pub language: Option<Language>,
}

impl ChangedFile {
    pub fn language_tag(&self) -> &'static str {
        self.language.map(Language::as_str).unwrap_or("unknown")
    }

    /// Every changed line number across all hunks.
    pub fn changed_lines(&self) -> BTreeSet<usize> {
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter().map(|l| l.line_number))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub base_ref: String,
    pub files: Vec<ChangedFile>,
}

/// A file section of a diff before any filtering or disk access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub file_path: String,
    pub hunks: Vec<ChangedHunk>,
}

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub base_ref: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_tests: bool,
}

impl DiffOptions {
    pub fn new(base_ref: impl Into<String>) -> Self {
        Self {
            base_ref: base_ref.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_tests: true,
        }
    }
}

const SECTION_PREFIX: &str = "diff --git ";

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
    })
}

/// Parse raw unified-diff text into per-file added-line hunks, in diff order.
/// Files whose hunks record no added lines are dropped.
pub fn parse_unified_diff(diff: &str) -> Vec<ParsedFile> {
    let mut files = Vec::new();
    let mut section: Vec<&str> = Vec::new();
    let mut in_section = false;

    for line in diff.split('\n') {
        if let Some(header) = line.strip_prefix(SECTION_PREFIX) {
            if in_section {
                files.extend(parse_section(&section));
            }
            section.clear();
            section.push(header);
            in_section = true;
        } else if in_section {
            section.push(line);
        }
    }
    if in_section {
        files.extend(parse_section(&section));
    }
    files
}

fn parse_section(lines: &[&str]) -> Option<ParsedFile> {
    let (header, body) = lines.split_first()?;
    let file_path = new_path_from_header(header)?;

    let mut hunks = Vec::new();
    let mut current: Option<(usize, Vec<ChangedLine>)> = None;

    for line in body {
        if let Some(caps) = hunk_header_re().captures(line) {
            if let Some((_, recorded)) = current.take() {
                hunks.extend(close_hunk(recorded));
            }
            let start = caps[1].parse().unwrap_or(0);
            current = Some((start, Vec::new()));
            continue;
        }
        let Some((next_line, recorded)) = current.as_mut() else {
            continue;
        };
        if line.is_empty() || *line == "\\ No newline at end of file" {
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            recorded.push(ChangedLine {
                line_number: *next_line,
                content: added.to_string(),
                kind: LineKind::Added,
            });
            *next_line += 1;
        } else if line.starts_with('-') {
            // removed lines do not exist in the new file
        } else if line.starts_with(' ') {
            *next_line += 1;
        }
    }
    if let Some((_, recorded)) = current.take() {
        hunks.extend(close_hunk(recorded));
    }

    if hunks.is_empty() {
        return None;
    }
    Some(ParsedFile { file_path, hunks })
}

fn close_hunk(lines: Vec<ChangedLine>) -> Option<ChangedHunk> {
    let first = lines.first()?;
    Some(ChangedHunk {
        start_line: first.line_number,
        line_count: lines.len(),
        lines,
    })
}

/// `a/<old> b/<new>` -> `<new>`
fn new_path_from_header(header: &str) -> Option<String> {
    if !header.starts_with("a/") {
        return None;
    }
    let idx = header.rfind(" b/")?;
    let path = &header[idx + 3..];
    if path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

/// Extract the changed source files between `options.base_ref` and HEAD.
///
/// Filters run in order: include globs, exclude globs, test patterns,
/// unknown language (kept only when include globs were given), presence on disk.
pub fn extract_diff(source: &dyn DiffSource, options: &DiffOptions) -> Result<DiffResult> {
    let root = source.root()?;
    let raw = source.diff(&options.base_ref)?;

    if raw.trim().is_empty() {
        return Ok(DiffResult {
            base_ref: options.base_ref.clone(),
            files: Vec::new(),
        });
    }

    let include = test_patterns::build_globset(&options.include)?;
    let exclude = test_patterns::build_globset(&options.exclude)?;
    let tests = test_patterns::default_test_globset();
    let has_include = !options.include.is_empty();

    let mut files = Vec::new();
    for parsed in parse_unified_diff(&raw) {
        let path = Utf8Path::new(&parsed.file_path);

        if has_include && !include.is_match(path) {
            continue;
        }
        if !options.exclude.is_empty() && exclude.is_match(path) {
            tracing::debug!(path = %path, "excluded by glob");
            continue;
        }
        if options.exclude_tests && test_patterns::is_test_file(path.as_str(), &tests) {
            tracing::debug!(path = %path, "skipping test file");
            continue;
        }

        let language = detect_language(path.as_std_path());
        if language.is_none() && !has_include {
            tracing::debug!(path = %path, "skipping file with unknown language");
            continue;
        }

        let abs = root.join(path.as_std_path());
        if !abs.exists() {
            continue;
        }
        let current_content =
            std::fs::read_to_string(&abs).map_err(|e| Error::io(&abs, e))?;

        files.push(ChangedFile {
            file_path: parsed.file_path,
            current_content,
            hunks: parsed.hunks,
            language,
        });
    }

    Ok(DiffResult {
        base_ref: options.base_ref.clone(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_path_uses_new_side() {
        assert_eq!(
            new_path_from_header("a/old name.rs b/src/new.rs").as_deref(),
            Some("src/new.rs")
        );
        assert_eq!(new_path_from_header("garbage"), None);
    }

    #[test]
    fn hunk_without_added_lines_is_dropped() {
        let section = [
            "a/x.py b/x.py",
            "@@ -1,2 +1,1 @@",
            " keep",
            "-gone",
        ];
        assert_eq!(parse_section(&section), None);
    }
}
