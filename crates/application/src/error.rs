use talkmee_audio::AudioError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("microphone error: {0}")]
    Microphone(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("busy: {0}")]
    Busy(&'static str),
    #[error("not recording")]
    NotRecording,
}

impl SessionError {
    /// Message shown to the learner.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied => "Microphone access denied.".to_string(),
            SessionError::Microphone(_) => "Microphone unavailable. Please check your mic.".to_string(),
            SessionError::Connection(_) => "Connection failed. Please check your mic.".to_string(),
            SessionError::Busy(what) => format!("Please wait until {what} finishes."),
            SessionError::NotRecording => "Not recording.".to_string(),
        }
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied => SessionError::PermissionDenied,
            other => SessionError::Microphone(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
