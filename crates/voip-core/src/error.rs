use thiserror::Error;

/// Errors produced by the router protocol layer and its collaborators.
#[derive(Debug, Error)]
pub enum VoipError {
    #[error("malformed body for command {command}: {reason}")]
    MalformedBody { command: u8, reason: String },

    #[error("invalid frame length: {0}")]
    FrameLength(u32),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("push queue error: {0}")]
    Push(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VoipError {
    pub(crate) fn malformed(command: u8, reason: impl Into<String>) -> Self {
        VoipError::MalformedBody {
            command,
            reason: reason.into(),
        }
    }
}

pub type VoipResult<T> = Result<T, VoipError>;
