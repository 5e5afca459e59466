use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;

/// A specialized result type for selector construction and evaluation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while building or calling selectors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A selector, structured selector or selector creator was set up with
    /// something it cannot use.
    #[error("{0}")]
    Configuration(String),
    /// An input function or combiner failed.
    ///
    /// These are created by user code and handed back to the caller exactly
    /// as they were returned.
    #[error(transparent)]
    Computation(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary error raised by user code.
    pub fn computation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Computation(Arc::new(err))
    }

    /// Create a computation error from a plain message.
    pub fn msg(message: impl Display) -> Self {
        Self::Computation(Arc::new(Message(message.to_string())))
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// A bare error message.
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);
