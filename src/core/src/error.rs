use thiserror::Error;

/// qsession error types
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid or unsupported configuration, detected before launch
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No free host port in the probe window
    #[error("Resource exhausted: no free port in {preferred}..{preferred}+{attempts}")]
    ResourceExhausted { preferred: u16, attempts: u16 },

    /// Required external binary not found
    #[error("Missing dependency: {binary}")]
    MissingDependency {
        binary: String,
        hint: Option<String>,
    },

    /// Hypervisor management socket refused, timed out or returned an error
    #[error("Control plane unavailable: {0}")]
    ControlPlaneUnavailable(String),

    /// Guest health channel socket not accepting connections yet
    #[error("Channel not ready: {0}")]
    ChannelNotReady(String),

    /// Primary or auxiliary process failed to start
    #[error("Launch failed: {message}")]
    LaunchError {
        message: String,
        hint: Option<String>,
    },

    /// Interrupted while the primary process was running
    #[error("Session aborted by interrupt")]
    Aborted,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Optional remediation hint attached to the error.
    pub fn hint(&self) -> Option<&str> {
        match self {
            SessionError::MissingDependency { hint, .. }
            | SessionError::LaunchError { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Whether the watchdog should keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::ControlPlaneUnavailable(_) | SessionError::ChannelNotReady(_)
        )
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SessionError {
    fn from(err: serde_yaml::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

/// Result type alias for qsession operations
pub type Result<T> = std::result::Result<T, SessionError>;
