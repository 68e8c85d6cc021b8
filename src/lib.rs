pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod mutants;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod runner;
pub mod safety;
pub mod state;
pub mod test_patterns;
pub mod validate;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Ruby,
    Go,
    Rust,
    Java,
    Kotlin,
    CSharp,
    Php,
    Swift,
    C,
    Cpp,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

/// Infer the language of a path from its extension. Unknown extensions yield `None`.
pub fn detect_language(path: &std::path::Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "ts" | "tsx" => Some(Language::TypeScript),
        "js" | "jsx" => Some(Language::JavaScript),
        "py" => Some(Language::Python),
        "rb" => Some(Language::Ruby),
        "go" => Some(Language::Go),
        "rs" => Some(Language::Rust),
        "java" => Some(Language::Java),
        "kt" => Some(Language::Kotlin),
        "cs" => Some(Language::CSharp),
        "php" => Some(Language::Php),
        "swift" => Some(Language::Swift),
        "c" | "h" => Some(Language::C),
        "cpp" | "hpp" => Some(Language::Cpp),
        _ => None,
    }
}
