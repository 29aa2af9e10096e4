/// Request-terminal failures surfaced to the caller.
///
/// Out-of-scope questions are not errors; they are a typed
/// [`crate::query::guard::Resolution`] variant with a stable response shape.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown postal code: {0}")]
    UnknownLocation(String),

    #[error("storage unavailable: {0}")]
    Storage(#[from] duckdb::Error),

    #[error("search index unavailable: {0}")]
    Index(#[from] tantivy::TantivyError),
}

/// Failures of the inference collaborator. Absorbed by the extractor stack
/// (logged, then the deterministic strategy runs); never surfaced to the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference collaborator returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("inference reply was not usable: {0}")]
    Malformed(String),
}
