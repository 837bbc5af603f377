//! Authorization pattern matching for authscan
//!
//! Every supported language gets a matcher with the same two phases:
//!
//! - `detect` is a single-pass pre-filter over the whole file. It may report
//!   files that turn out to hold nothing, but it never rejects a file that
//!   `find_matches` would report on.
//! - `extract` parses the file's block structure and returns each hit as an
//!   [`AuthorizationDetail`] with its construct kind, line span and a bounded
//!   window of surrounding context.
//!
//! Malformed source surfaces as [`MatchError`] for that file only.

mod languages;
pub mod rules;
pub mod structure;

use std::path::Path;

use authscan_core::{AuthorizationDetail, ConstructKind, Language, Match};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::rules::RuleTable;
pub use crate::structure::{Block, SourceStructure, StructureError};

/// Longest match text kept per hit
const MAX_MATCH_TEXT: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("cannot parse structure of {path}: {source}")]
    Structure {
        path: String,
        #[source]
        source: StructureError,
    },
}

/// Context and span settings shared by all matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Lines of context kept on each side of a detail's span
    pub context_lines: usize,
    /// Hard cap on a detail's context, in characters
    pub max_context_chars: usize,
    /// How far below an attribute its decorated declaration may open
    pub attribute_lookahead: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            context_lines: 6,
            max_context_chars: 4_000,
            attribute_lookahead: 6,
        }
    }
}

/// The matcher for one language.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    language: Language,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(language: Language, config: MatcherConfig) -> Self {
        Self { language, config }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Cheap pre-filter: could this file contain authorization logic?
    pub fn detect(&self, content: &str) -> bool {
        self.rules().detect(content)
    }

    /// Located hits without structural parsing.
    pub fn find_matches(&self, content: &str) -> Vec<Match> {
        let rules = self.rules();
        let mut matches = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            for rule in rules.line_hits(line) {
                matches.push(Match {
                    pattern: rule.name.to_string(),
                    line: idx + 1,
                    text: truncate(line.trim(), MAX_MATCH_TEXT).to_string(),
                });
            }
        }
        matches
    }

    /// Structured details for every hit in `content`.
    pub fn extract(&self, content: &str, path: &str) -> Result<Vec<AuthorizationDetail>, MatchError> {
        if !self.detect(content) {
            return Ok(Vec::new());
        }

        let blocks = self.blocks(content).map_err(|source| MatchError::Structure {
            path: path.to_string(),
            source,
        })?;
        let structure = SourceStructure::new(blocks);
        let lines: Vec<&str> = content.lines().collect();
        let rules = self.rules();

        let mut details = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            for rule in rules.line_hits(line) {
                let construct = match rule.construct {
                    ConstructKind::Attribute => ConstructKind::Attribute,
                    default => self.classify(line).unwrap_or(default),
                };
                let (line_start, line_end) = self.span(&structure, line_no, construct);
                details.push(AuthorizationDetail {
                    construct,
                    pattern: rule.name.to_string(),
                    category: rule.category.to_string(),
                    line_start,
                    line_end,
                    context: self.context(&lines, line_start, line_end),
                });
            }
        }

        trace!(
            path,
            language = %self.language,
            blocks = structure.blocks().len(),
            details = details.len(),
            "extracted authorization details"
        );
        Ok(details)
    }

    fn rules(&self) -> &'static RuleTable {
        match self.language {
            Language::Python => &languages::python::RULES,
            Language::Java => &languages::java::RULES,
            Language::CSharp => &languages::csharp::RULES,
            Language::JavaScript => &languages::javascript::RULES,
            Language::Cobol => &languages::cobol::RULES,
            Language::ProceduralSql => &languages::plsql::RULES,
        }
    }

    fn blocks(&self, content: &str) -> Result<Vec<Block>, StructureError> {
        match self.language {
            Language::Python => languages::python::blocks(content),
            Language::Java => languages::java::blocks(content),
            Language::CSharp => languages::csharp::blocks(content),
            Language::JavaScript => languages::javascript::blocks(content),
            Language::Cobol => languages::cobol::blocks(content),
            Language::ProceduralSql => languages::plsql::blocks(content),
        }
    }

    fn classify(&self, line: &str) -> Option<ConstructKind> {
        match self.language {
            Language::Python => languages::python::classify(line),
            Language::Java | Language::CSharp | Language::JavaScript => {
                languages::classify_c_family(line)
            }
            Language::Cobol => languages::cobol::classify(line),
            Language::ProceduralSql => languages::plsql::classify(line),
        }
    }

    fn span(&self, structure: &SourceStructure, line: usize, construct: ConstructKind) -> (usize, usize) {
        let lookahead = match construct {
            ConstructKind::Attribute => self.config.attribute_lookahead,
            ConstructKind::ConditionalCheck => 1,
            ConstructKind::MethodCall | ConstructKind::VariableAssignment => return (line, line),
        };
        match structure.block_opening_near(line, lookahead) {
            Some(block) => (line, block.end.max(line)),
            None => (line, line),
        }
    }

    fn context(&self, lines: &[&str], start: usize, end: usize) -> String {
        let from = start.saturating_sub(self.config.context_lines + 1);
        let to = (end + self.config.context_lines).min(lines.len());
        let window = lines[from..to].join("\n");
        truncate(&window, self.config.max_context_chars).to_string()
    }
}

/// Picks the matcher for a path.
#[derive(Debug, Clone)]
pub struct MatcherRegistry {
    config: MatcherConfig,
    languages: Vec<Language>,
}

impl MatcherRegistry {
    pub fn new(config: MatcherConfig) -> Self {
        Self::with_languages(config, &Language::ALL)
    }

    /// Registry restricted to `languages`.
    pub fn with_languages(config: MatcherConfig, languages: &[Language]) -> Self {
        Self {
            config,
            languages: languages.to_vec(),
        }
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn config(&self) -> MatcherConfig {
        self.config
    }

    pub fn matcher(&self, language: Language) -> Option<Matcher> {
        self.languages
            .contains(&language)
            .then(|| Matcher::new(language, self.config))
    }

    pub fn matcher_for(&self, path: &Path) -> Option<Matcher> {
        Language::from_path(path).and_then(|language| self.matcher(language))
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(language: Language) -> Matcher {
        Matcher::new(language, MatcherConfig::default())
    }

    #[test]
    fn test_registry_routes_by_extension() {
        let registry = MatcherRegistry::default();
        let m = registry.matcher_for(Path::new("app/views.py")).unwrap();
        assert_eq!(m.language(), Language::Python);
        assert!(registry.matcher_for(Path::new("README.md")).is_none());

        let only_java = MatcherRegistry::with_languages(MatcherConfig::default(), &[Language::Java]);
        assert!(only_java.matcher_for(Path::new("a.py")).is_none());
        assert!(only_java.matcher_for(Path::new("A.java")).is_some());
    }

    #[test]
    fn test_decorator_spans_function_body() {
        let src = "@login_required\ndef view(request):\n    data = load()\n    return data\n\nx = 1\n";
        let details = matcher(Language::Python).extract(src, "views.py").unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].construct, ConstructKind::Attribute);
        assert_eq!((details[0].line_start, details[0].line_end), (1, 4));
        assert!(details[0].context.contains("def view"));
    }

    #[test]
    fn test_conditional_refinement() {
        let src = "def f(user):\n    if user.has_perm('x'):\n        go()\n    ok = user.has_perm('y')\n";
        let details = matcher(Language::Python).extract(src, "f.py").unwrap();
        let kinds: Vec<_> = details.iter().map(|d| (d.construct, d.line_start, d.line_end)).collect();
        assert_eq!(
            kinds,
            vec![
                (ConstructKind::ConditionalCheck, 2, 3),
                (ConstructKind::VariableAssignment, 4, 4)
            ]
        );
    }

    #[test]
    fn test_csharp_allman_attribute() {
        let src = "public class A : Controller\n{\n    [Authorize(Policy = \"Admin\")]\n    public IActionResult Delete(int id)\n    {\n        return Ok();\n    }\n}\n";
        let details = matcher(Language::CSharp).extract(src, "A.cs").unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!((details[0].line_start, details[0].line_end), (3, 7));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let src = "class A {\n  @PreAuthorize(\"hasRole('X')\")\n  void f() {\n}\n";
        let err = matcher(Language::Java).extract(src, "A.java").unwrap_err();
        let MatchError::Structure { path, source } = err;
        assert_eq!(path, "A.java");
        assert_eq!(source.line, 1);
    }

    #[test]
    fn test_malformed_file_without_hits_is_skipped() {
        let details = matcher(Language::Java).extract("class A {\n", "A.java").unwrap();
        assert!(details.is_empty());
    }

    #[test]
    fn test_find_matches_agrees_with_detect() {
        let sources = [
            (Language::Python, "import os\n"),
            (Language::Python, "x = 1\n@admin_required\ndef f(): pass\n"),
            (Language::JavaScript, "app.get('/', passport.authenticate('jwt'), h)\n"),
            (Language::ProceduralSql, "select 1;\n  GRANT SELECT ON t TO r;\n"),
            (Language::Cobol, "       DISPLAY 'HELLO'.\n"),
        ];
        for (language, src) in sources {
            let m = matcher(language);
            if !m.find_matches(src).is_empty() {
                assert!(m.detect(src), "{language} pre-filter rejected {src:?}");
            }
        }
    }

    #[test]
    fn test_context_is_bounded() {
        let mut src = String::from("def f(user):\n");
        for _ in 0..50 {
            src.push_str("    pass_through_a_long_line_of_code_that_pads_the_context_window()\n");
        }
        src.push_str("    if user.is_superuser:\n        go()\n");
        let config = MatcherConfig {
            context_lines: 100,
            max_context_chars: 256,
            ..Default::default()
        };
        let details = Matcher::new(Language::Python, config).extract(&src, "f.py").unwrap();
        assert_eq!(details.len(), 1);
        assert!(details[0].context.chars().count() <= 256);
    }
}
