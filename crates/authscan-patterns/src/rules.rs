//! Rule tables shared by every language matcher

use authscan_core::ConstructKind;
use regex::{Regex, RegexSet};

/// Static description of one authorization pattern.
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub name: &'static str,
    pub category: &'static str,
    pub construct: ConstructKind,
    pub pattern: &'static str,
}

impl RuleSpec {
    pub const fn new(
        name: &'static str,
        category: &'static str,
        construct: ConstructKind,
        pattern: &'static str,
    ) -> Self {
        Self {
            name,
            category,
            construct,
            pattern,
        }
    }
}

#[derive(Debug)]
pub struct PatternRule {
    pub name: &'static str,
    pub category: &'static str,
    pub construct: ConstructKind,
    pub regex: Regex,
}

/// Compiled rules for one language.
///
/// Line patterns never span a newline, so any line a rule matches is also
/// matched by the whole-content set compiled in multi-line mode. `detect`
/// therefore never rejects a file that `line_hits` would report on.
#[derive(Debug)]
pub struct RuleTable {
    rules: Vec<PatternRule>,
    line_set: RegexSet,
    content_set: RegexSet,
}

impl RuleTable {
    /// Compile a static rule table. Patterns are literals checked by the
    /// language tests, so a bad one is a programming error.
    pub fn compile(specs: &[RuleSpec]) -> Self {
        let rules = specs
            .iter()
            .map(|s| PatternRule {
                name: s.name,
                category: s.category,
                construct: s.construct,
                regex: Regex::new(s.pattern).expect("invalid authorization rule pattern"),
            })
            .collect();
        let line_set = RegexSet::new(specs.iter().map(|s| s.pattern))
            .expect("invalid authorization rule pattern");
        let content_set = RegexSet::new(specs.iter().map(|s| format!("(?m)(?:{})", s.pattern)))
            .expect("invalid authorization rule pattern");

        Self {
            rules,
            line_set,
            content_set,
        }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Whole-file pre-filter, single pass over the content.
    pub fn detect(&self, content: &str) -> bool {
        self.content_set.is_match(content)
    }

    /// Rules matching a single line, in table order.
    pub fn line_hits<'a>(&'a self, line: &str) -> impl Iterator<Item = &'a PatternRule> + 'a {
        self.line_set
            .matches(line)
            .into_iter()
            .map(move |idx| &self.rules[idx])
    }
}
