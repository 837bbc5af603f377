//! Extracted policy records (pre-persistence)

use serde::{Deserialize, Serialize};

pub type PolicyId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPolicyRecord {
    pub subject: String,
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(default)]
    pub snippet: String,
}
