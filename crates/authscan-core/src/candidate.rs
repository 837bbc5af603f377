//! Ephemeral matcher output
//!
//! Candidates live only for the batch that holds them; nothing here is
//! persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Language;

/// A lexical pre-filter hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub pattern: String,
    /// 1-based line number
    pub line: usize,
    pub text: String,
}

/// A file or procedure that passed the pre-filter.
#[derive(Debug, Clone)]
pub struct AuthorizationCandidate {
    pub path: String,
    pub language: Language,
    pub content: String,
    pub matches: Vec<Match>,
}

impl AuthorizationCandidate {
    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    Attribute,
    MethodCall,
    ConditionalCheck,
    VariableAssignment,
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstructKind::Attribute => "attribute",
            ConstructKind::MethodCall => "method_call",
            ConstructKind::ConditionalCheck => "conditional_check",
            ConstructKind::VariableAssignment => "variable_assignment",
        };
        f.write_str(s)
    }
}

/// An authorization construct located by the structural pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDetail {
    pub construct: ConstructKind,
    pub pattern: String,
    pub category: String,
    pub line_start: usize,
    pub line_end: usize,
    pub context: String,
}
