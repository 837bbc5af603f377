//! Credential-shaped pattern catalog

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

/// Built-in patterns as (type, description, regex). Order matters: more
/// specific patterns come first so they claim a secret before the generic
/// ones see it.
const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "PRIVATE_KEY",
        "PEM private key block",
        r"(?s)-----BEGIN[A-Z ]*PRIVATE KEY-----.*?(?:-----END[A-Z ]*PRIVATE KEY-----|\z)",
    ),
    (
        "AWS_ACCESS_KEY",
        "AWS access key id",
        r"\b(?:AKIA|ASIA|AGPA|AIDA|AROA|ANPA|ANVA|AIPA)[0-9A-Z]{16}\b",
    ),
    (
        "AWS_SECRET_KEY",
        "AWS secret access key assignment",
        r#"(?i)aws_?secret_?(?:access_?)?key['"]?\s*[:=]\s*['"]?[A-Za-z0-9/+=]{40}"#,
    ),
    (
        "GITHUB_TOKEN",
        "GitHub token",
        r"\bgh[pousr]_[A-Za-z0-9]{36,}|\bgithub_pat_[A-Za-z0-9_]{22,}",
    ),
    ("GITLAB_TOKEN", "GitLab personal access token", r"\bglpat-[A-Za-z0-9_\-]{20,}"),
    ("SLACK_TOKEN", "Slack token", r"\bxox[baprs]-[A-Za-z0-9-]{10,}"),
    ("STRIPE_KEY", "Stripe secret key", r"\b(?:sk|rk)_(?:live|test)_[A-Za-z0-9]{16,}"),
    ("GOOGLE_API_KEY", "Google API key", r"\bAIza[0-9A-Za-z_\-]{35}"),
    (
        "JWT",
        "JSON web token",
        r"eyJ[a-zA-Z0-9_-]+\.eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
    ),
    (
        "CONNECTION_STRING",
        "URL connection string with inline credentials",
        r#"(?i)\b(?:postgres(?:ql)?|mysql|mariadb|mongodb(?:\+srv)?|redis|amqps?|mssql|sqlserver|oracle|jdbc:[a-z]+)://[^\s:/@'"]+:[^\s@'"]+@[^\s'"]+"#,
    ),
    (
        "CONNECTION_STRING_PASSWORD",
        "key/value connection string password",
        r#"(?i)\b(?:server|data source|host|user id|uid)\s*=[^'"\n]*?\b(?:password|pwd)\s*=\s*[^;'"\s]+"#,
    ),
    (
        "PASSWORD_LITERAL",
        "hard-coded password literal",
        r#"(?i)\b(?:password|passwd|pwd|client_secret|secret_key)\b['"]?\s*[:=]\s*['"][^'"\s]{4,}['"]"#,
    ),
    (
        "API_KEY",
        "generic API key assignment",
        r#"(?i)(api[_-]?key|apikey)['"\s:=]+([a-zA-Z0-9_-]{20,})"#,
    ),
    (
        "BEARER_TOKEN",
        "bearer token",
        r"(?i)bearer\s+([a-zA-Z0-9_.\-]{20,})",
    ),
];

/// A user-supplied catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSecretPattern {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct SecretPattern {
    pub kind: String,
    pub description: String,
    pub regex: Regex,
}

/// Immutable set of secret patterns, built once at startup.
#[derive(Debug, Clone)]
pub struct SecretCatalog {
    patterns: Vec<SecretPattern>,
    set: RegexSet,
}

impl SecretCatalog {
    /// Catalog with the built-in patterns only.
    pub fn builtin() -> Self {
        let patterns: Vec<SecretPattern> = BUILTIN
            .iter()
            .map(|(kind, description, pattern)| SecretPattern {
                kind: kind.to_string(),
                description: description.to_string(),
                regex: Regex::new(pattern).expect("invalid built-in secret pattern"),
            })
            .collect();
        Self::from_patterns(patterns).expect("invalid built-in secret pattern")
    }

    /// Extend the catalog with custom patterns, appended after the built-ins.
    pub fn with_custom(self, custom: &[CustomSecretPattern]) -> Result<Self, regex::Error> {
        let mut patterns = self.patterns;
        for entry in custom {
            patterns.push(SecretPattern {
                kind: entry.name.to_ascii_uppercase(),
                description: if entry.description.is_empty() {
                    format!("custom pattern {}", entry.name)
                } else {
                    entry.description.clone()
                },
                regex: Regex::new(&entry.pattern)?,
            });
        }
        Self::from_patterns(patterns)
    }

    fn from_patterns(patterns: Vec<SecretPattern>) -> Result<Self, regex::Error> {
        let set = RegexSet::new(patterns.iter().map(|p| p.regex.as_str()))?;
        Ok(Self { patterns, set })
    }

    pub fn patterns(&self) -> &[SecretPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns with at least one match in `text`, in catalog order.
    pub(crate) fn matching<'a>(&'a self, text: &str) -> impl Iterator<Item = &'a SecretPattern> + 'a {
        self.set
            .matches(text)
            .into_iter()
            .map(move |idx| &self.patterns[idx])
    }
}

impl Default for SecretCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_compiles() {
        let catalog = SecretCatalog::builtin();
        assert_eq!(catalog.len(), BUILTIN.len());
    }

    #[test]
    fn test_custom_pattern_appended() {
        let catalog = SecretCatalog::builtin()
            .with_custom(&[CustomSecretPattern {
                name: "internal_token".to_string(),
                pattern: r"itk_[a-f0-9]{32}".to_string(),
                description: String::new(),
            }])
            .unwrap();
        let last = catalog.patterns().last().unwrap();
        assert_eq!(last.kind, "INTERNAL_TOKEN");
        assert_eq!(last.description, "custom pattern internal_token");
    }

    #[test]
    fn test_invalid_custom_pattern_rejected() {
        let result = SecretCatalog::builtin().with_custom(&[CustomSecretPattern {
            name: "broken".to_string(),
            pattern: "(unclosed".to_string(),
            description: String::new(),
        }]);
        assert!(result.is_err());
    }
}
