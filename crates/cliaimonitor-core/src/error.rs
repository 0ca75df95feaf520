use thiserror::Error;

/// Error kinds threaded through every store operation (spec §7).
///
/// Store methods wrap the underlying failure with a short context phrase
/// and propagate it; `NotFound` is only ever produced by inspecting
/// `RowsAffected` or a no-rows sentinel, never by swallowing an error.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{0}")]
    Integrity(String),

    #[error("{0}")]
    Unavailable(String),
}

impl CoreError {
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
