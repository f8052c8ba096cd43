//! Intent classification
//!
//! Extracts a normalized request signature (task, language, path, extension,
//! keywords, parameters) from a raw objective. The signature drives scored
//! tool resolution in the orchestrator; nothing here talks to the model.

use crate::error::{ForemanError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Ordered task table. Walked top to bottom; the first task whose signal
/// words intersect the objective's keyword set wins, so the order decides
/// ambiguous objectives like "convert and lint".
const TASK_SIGNALS: &[(&str, &[&str])] = &[
    ("conversion", &["convert", "conversion", "transform", "export"]),
    ("lint", &["lint", "linting", "validate"]),
    ("format", &["format", "reformat", "prettify", "beautify"]),
    ("test", &["test", "tests", "testing"]),
    ("build", &["build", "compile", "compilation"]),
    ("search", &["search", "find", "grep", "locate"]),
    ("summarize", &["summarize", "summarise", "summary", "digest"]),
    ("extract", &["extract", "extraction", "parse"]),
    ("analysis", &["analyze", "analyse", "inspect", "review", "audit"]),
];

/// Extension-to-language lookup used when the objective names a file but not
/// a language.
const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("java", "java"),
    ("rb", "ruby"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("md", "markdown"),
    ("csv", "csv"),
    ("xml", "xml"),
    ("txt", "text"),
];

lazy_static! {
    /// Candidate path with a known source/file extension, case preserved.
    static ref PATH_WITH_EXTENSION: Regex = Regex::new(
        r"(?x)
        ([A-Za-z]:)? [\w.~\-]* [\w.~\-/\\]*
        \.(?:rs|py|jsx?|tsx?|go|java|rb|c|h|cpp|hpp|cs|sh|bash|sql|html|css|json|ya?ml|toml|md|csv|xml|txt|log|pdf|docx|xlsx)
        \b"
    )
    .expect("path regex");

    /// Explicit language mention, independent of any path.
    static ref LANGUAGE_KEYWORD: Regex = Regex::new(
        r"\b(rust|python|javascript|typescript|golang|java|ruby|csharp|shell|bash|sql|html|css|json|yaml|toml|markdown|csv|xml)\b"
    )
    .expect("language regex");

    static ref WORD_SPLIT: Regex = Regex::new(r"[^a-z0-9_]+").expect("word split regex");

    static ref DRIVE_LETTER: Regex = Regex::new(r"^[A-Za-z]:[/\\]").expect("drive regex");
}

/// Normalized request signature produced by [`IntentClassifier::classify`].
///
/// Immutable once produced; the orchestrator only reads it.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Raw objective text as supplied
    pub objective: String,
    /// Classified task, if any signal word matched
    pub task: Option<String>,
    /// Detected language
    pub language: Option<String>,
    /// Detected file extension, without the leading dot
    pub extension: Option<String>,
    /// Candidate target path named in the objective
    pub target_path: Option<String>,
    /// Lower-cased word set of the objective
    pub keywords: HashSet<String>,
    /// target / extension / language parameters, when present
    pub parameters: HashMap<String, String>,
}

/// Heuristic intent classifier
#[derive(Debug, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an objective into a [`ToolRequest`].
    ///
    /// Fails with [`ForemanError::InvalidInput`] when the objective is empty
    /// or whitespace only.
    pub fn classify(&self, objective: &str) -> Result<ToolRequest> {
        if objective.trim().is_empty() {
            return Err(ForemanError::invalid_input("objective is empty"));
        }

        let lowered = objective.to_lowercase();
        let keywords: HashSet<String> = WORD_SPLIT
            .split(&lowered)
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect();

        let task = classify_task(&keywords);
        let target_path = extract_path(objective);
        let extension = target_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let language = extract_language(&lowered, extension.as_deref());

        let mut parameters = HashMap::new();
        if let Some(target) = &target_path {
            parameters.insert("target".to_string(), target.clone());
        }
        if let Some(ext) = &extension {
            parameters.insert("extension".to_string(), ext.clone());
        }
        if let Some(lang) = &language {
            parameters.insert("language".to_string(), lang.clone());
        }

        Ok(ToolRequest {
            objective: objective.to_string(),
            task,
            language,
            extension,
            target_path,
            keywords,
            parameters,
        })
    }
}

fn classify_task(keywords: &HashSet<String>) -> Option<String> {
    for (task, signals) in TASK_SIGNALS {
        if signals.iter().any(|s| keywords.contains(*s)) {
            return Some((*task).to_string());
        }
    }
    // Generic fallback: a bare "scan" request is treated as analysis
    if keywords.contains("scan") {
        return Some("analysis".to_string());
    }
    None
}

fn extract_path(objective: &str) -> Option<String> {
    if let Some(m) = PATH_WITH_EXTENSION.find(objective) {
        return Some(m.as_str().to_string());
    }

    // Fall back to whitespace tokens that look path-shaped or exist on disk
    for token in objective.split_whitespace() {
        let trimmed = token
            .trim_matches(|c: char| ",;:!?\"'`()[]{}<>".contains(c))
            .trim_end_matches('.');
        if trimmed.is_empty() {
            continue;
        }
        if looks_path_shaped(trimmed) || Path::new(trimmed).exists() {
            return Some(trimmed.to_string());
        }
    }
    None
}

fn looks_path_shaped(token: &str) -> bool {
    token.starts_with("./")
        || token.starts_with("../")
        || token.contains('/')
        || token.contains('\\')
        || DRIVE_LETTER.is_match(token)
}

fn extract_language(lowered: &str, extension: Option<&str>) -> Option<String> {
    if let Some(m) = LANGUAGE_KEYWORD.find(lowered) {
        let lang = match m.as_str() {
            "golang" => "go",
            "bash" => "shell",
            other => other,
        };
        return Some(lang.to_string());
    }
    extension.and_then(|ext| {
        EXTENSION_LANGUAGES
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, lang)| (*lang).to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(objective: &str) -> ToolRequest {
        IntentClassifier::new().classify(objective).unwrap()
    }

    #[test]
    fn empty_objective_is_rejected() {
        let classifier = IntentClassifier::new();
        assert!(matches!(
            classifier.classify("   "),
            Err(ForemanError::InvalidInput { .. })
        ));
    }

    #[test]
    fn lint_objective_with_yaml_target() {
        let request = classify("lint my config.yaml file");
        assert_eq!(request.task.as_deref(), Some("lint"));
        assert_eq!(request.target_path.as_deref(), Some("config.yaml"));
        assert_eq!(request.extension.as_deref(), Some("yaml"));
        assert_eq!(request.language.as_deref(), Some("yaml"));
        assert!(request.keywords.contains("lint"));
        assert_eq!(request.parameters.get("target").map(String::as_str), Some("config.yaml"));
    }

    #[test]
    fn task_table_order_is_significant() {
        // "convert" appears before "analyze" in the table; both match here
        let request = classify("convert and analyze data.csv");
        assert_eq!(request.task.as_deref(), Some("conversion"));
    }

    #[test]
    fn scan_falls_back_to_analysis() {
        let request = classify("scan the project for issues");
        assert_eq!(request.task.as_deref(), Some("analysis"));
    }

    #[test]
    fn no_signal_yields_no_task() {
        let request = classify("tell me a joke");
        assert_eq!(request.task, None);
    }

    #[test]
    fn path_shaped_token_without_known_extension() {
        let request = classify("summarize ./notes/meeting-2024.rec please");
        assert_eq!(request.target_path.as_deref(), Some("./notes/meeting-2024.rec"));
    }

    #[test]
    fn trailing_punctuation_is_trimmed_from_path_tokens() {
        let request = classify("inspect src/lib.nope, thanks");
        assert_eq!(request.target_path.as_deref(), Some("src/lib.nope"));
    }

    #[test]
    fn explicit_language_keyword_beats_extension_lookup() {
        let request = classify("lint this python script build.gradle.kts");
        assert_eq!(request.language.as_deref(), Some("python"));
    }

    #[test]
    fn language_from_extension_when_not_named() {
        let request = classify("format main.rs");
        assert_eq!(request.language.as_deref(), Some("rust"));
        assert_eq!(request.extension.as_deref(), Some("rs"));
    }
}
