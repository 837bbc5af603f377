//! Scanned source languages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Languages with an authorization pattern matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Java,
    CSharp,
    JavaScript,
    Cobol,
    ProceduralSql,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::Java,
        Language::CSharp,
        Language::JavaScript,
        Language::Cobol,
        Language::ProceduralSql,
    ];

    /// Map a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "py" | "pyw" => Some(Language::Python),
            "java" | "kt" | "kts" => Some(Language::Java),
            "cs" => Some(Language::CSharp),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" => {
                Some(Language::JavaScript)
            }
            "cbl" | "cob" | "cpy" | "cobol" => Some(Language::Cobol),
            "sql" | "pls" | "plsql" | "pkb" | "pks" | "prc" | "fnc" | "trg" | "psql" => {
                Some(Language::ProceduralSql)
            }
            _ => None,
        }
    }

    /// Map a path to a language using its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::JavaScript => "javascript",
            Language::Cobol => "cobol",
            Language::ProceduralSql => "procedural_sql",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("CBL"), Some(Language::Cobol));
        assert_eq!(Language::from_extension("tsx"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("pkb"), Some(Language::ProceduralSql));
        assert_eq!(Language::from_extension("md"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            Language::from_path(Path::new("src/Controllers/AdminController.cs")),
            Some(Language::CSharp)
        );
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }
}
