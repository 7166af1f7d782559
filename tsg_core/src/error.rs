use std::error::Error as StdError;

/// Common error type for `tsg_core`.
///
/// Backends (Postgres, Nomad) keep the underlying error chain via `Error::backend`.
/// Orchestrator steps wrap whatever failed in `Error::Orchestrator` so callers can
/// tell which external call broke the sequence.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("unable to {step}: {source}")]
    Orchestrator {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[tracing::instrument(level = "debug", name = "tsg.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn orchestrator(step: &'static str, source: Error) -> Self {
        Self::Orchestrator {
            step,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
