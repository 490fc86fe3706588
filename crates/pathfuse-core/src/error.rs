use thiserror::Error;

/// Errors raised by the positioning core.
///
/// Most failure modes in this crate degrade estimation quality instead of
/// surfacing as errors. Only lifecycle misuse ends up here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FusionError {
    /// A conversion needed the session reference frame before it was set.
    #[error("session reference frame has not been established")]
    NotInitialized,

    /// The reference frame is fixed for the lifetime of a session.
    #[error("session reference frame is already established")]
    ReferenceAlreadyEstablished,

    /// The fusion worker has shut down and no longer accepts work.
    #[error("fusion worker has stopped")]
    WorkerStopped,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FusionError>;
