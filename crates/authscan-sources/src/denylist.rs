use glob::Pattern;

/// Paths never handed to a matcher: secrets, vendored and generated trees.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "**/.env*",
    "**/*.key",
    "**/*.pem",
    "**/*.p12",
    "**/.aws/**",
    "**/secrets/**",
    "**/node_modules/**",
    "**/vendor/**",
    "**/target/**",
    "**/dist/**",
    "**/*.min.js",
];

/// Glob denylist over repository-relative paths
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    patterns: Vec<Pattern>,
}

impl Denylist {
    /// Create new denylist from pattern strings; invalid globs are dropped
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled: Vec<Pattern> = patterns
            .into_iter()
            .filter_map(|p| Pattern::new(p.as_ref()).ok())
            .collect();

        Self { patterns: compiled }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DENYLIST.iter().copied())
    }

    /// Check if a path matches any deny pattern
    pub fn is_denied(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }

    /// Get first matching pattern (for log messages)
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches(path))
            .map(|p| p.as_str())
    }
}
