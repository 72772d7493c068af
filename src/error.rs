//! Typed failures of the query layer.
//!
//! Sync and persistence plumbing uses `anyhow::Result` with context; the
//! variants here are the ones the interception layer needs to tell apart.

/// Errors raised while parsing a query document or answering it from the store.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The query document could not be parsed.
    #[error("invalid query document: {0}")]
    InvalidQuery(String),

    /// A query references a variable that was not supplied.
    #[error("missing variable: ${0}")]
    MissingVariable(String),

    /// Arguments could not be decoded into the filter/sort/pagination shape.
    #[error("invalid arguments for {query}: {reason}")]
    InvalidArguments { query: String, reason: String },

    /// The query name is not part of the servable registry of this store.
    #[error("query {0} is not servable from the store")]
    UnknownQuery(String),

    /// A snapshot could not be turned into a response object.
    #[error("projection failed: {0}")]
    Projection(String),

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

impl MirrorError {
    pub fn invalid_arguments(query: &str, reason: impl ToString) -> Self {
        Self::InvalidArguments {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }
}
