//! Per-language rule tables and structure scanners

pub(crate) mod cobol;
pub(crate) mod csharp;
pub(crate) mod java;
pub(crate) mod javascript;
pub(crate) mod plsql;
pub(crate) mod python;

use std::sync::LazyLock;

use authscan_core::ConstructKind;
use regex::Regex;

// if (...), else if (...), while (...), switch arms, ternaries
static C_CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|while)\s*\(|^\s*(?:case\b|when\b)|\?[^:?;]+:").unwrap()
});

// [modifiers] [Type] name = value, excluding ==, => and !=
static C_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:final|const|let|var|val|readonly|private|public|protected|internal|static)\s+)*(?:[\w<>\[\],.?]+\s+)?[A-Za-z_$][\w$.]*\s*=[^=>]",
    )
    .unwrap()
});

/// Refine a call-site hit in Java, C# or JavaScript.
pub(crate) fn classify_c_family(line: &str) -> Option<ConstructKind> {
    if C_CONDITIONAL.is_match(line) {
        Some(ConstructKind::ConditionalCheck)
    } else if C_ASSIGNMENT.is_match(line) {
        Some(ConstructKind::VariableAssignment)
    } else {
        None
    }
}
