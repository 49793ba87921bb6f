use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Transport could not be established or dropped during the handshake.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session is {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, LiveError>;
