use thiserror::Error;

/// Failures while obtaining or parsing the customer table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source unavailable: {url} answered HTTP {status}")]
    SourceUnavailable {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("source unavailable: {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no file id found in drive URL {0:?} (expected .../d/<id>/...)")]
    InvalidDriveUrl(String),

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV")]
    Csv(#[from] csv::Error),

    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("row {row}: column {column} is not an order count: {value:?}")]
    InvalidCount {
        row: usize,
        column: &'static str,
        value: String,
    },
}

impl LoadError {
    /// Network failures, as opposed to a bad file.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LoadError::SourceUnavailable { .. } | LoadError::Transport { .. }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("incorrect username or password")]
    InvalidCredentials,
}
