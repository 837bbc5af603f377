use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("checkout of {locator} failed: {reason}")]
    Checkout { locator: String, reason: String },

    #[error("cannot connect to catalog {descriptor}: {reason}")]
    Connection { descriptor: String, reason: String },

    #[error("diff against {since} failed: {reason}")]
    Diff { since: String, reason: String },

    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog export: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("enumeration failed: {0}")]
    Walk(#[from] ignore::Error),
}

impl SourceError {
    /// Errors that describe one unreadable unit rather than the whole source.
    pub fn is_unit_error(&self) -> bool {
        matches!(self, SourceError::Read { .. } | SourceError::Walk(_))
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
