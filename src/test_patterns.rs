use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Paths that look like tests in common ecosystems. Mutating test code says
/// nothing about the suite's strength, so these are skipped by default.
pub const DEFAULT_TEST_PATTERNS: &[&str] = &[
    // JavaScript / TypeScript
    "**/*.test.{ts,js,tsx,jsx}",
    "**/*.spec.{ts,js,tsx,jsx}",
    "**/__tests__/**",
    // Python
    "**/test_*.py",
    "**/*_test.py",
    "**/conftest.py",
    // Python, Rust
    "**/tests/**",
    // Go
    "**/*_test.go",
    // Java
    "**/src/test/**",
    "**/*Test.java",
    // Ruby
    "**/*_spec.rb",
    "**/spec/**",
    // C#
    "**/*Tests.cs",
    "**/*.Tests/**",
];

/// Compile glob patterns with `/`-aware `*`, so `*.py` never crosses a directory.
pub fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern.as_ref())
            .literal_separator(true)
            .build()?;
        builder.add(glob);
    }
    builder.build()
}

pub fn default_test_globset() -> GlobSet {
    // The built-in patterns are static and known to compile.
    build_globset(DEFAULT_TEST_PATTERNS).unwrap_or_else(|_| GlobSet::empty())
}

pub fn is_test_file(path: &str, patterns: &GlobSet) -> bool {
    patterns.is_match(path)
}
