//! Error types for the session core.

use std::fmt;

use thiserror::Error;

/// Result type alias using the core's error type.
pub type XrResult<T> = std::result::Result<T, XrError>;

/// A native result code as reported by the runtime or the GPU API.
///
/// `raw` is the numeric code, `name` its stringified form (for example
/// `XR_ERROR_SESSION_NOT_RUNNING` or `VK_ERROR_INITIALIZATION_FAILED`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCode {
    pub raw: i32,
    pub name: String,
}

impl ResultCode {
    pub fn new(raw: i32, name: impl Into<String>) -> Self {
        Self {
            raw,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.raw)
    }
}

/// Result of a single native call.
pub type RtResult<T> = std::result::Result<T, ResultCode>;

#[derive(Debug, Error)]
pub enum XrError {
    /// A required api layer or extension is not advertised by the runtime.
    #[error("capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("instance creation failed: {0}")]
    InstanceCreationFailed(String),

    #[error("no XR system found: {0}")]
    SystemNotFound(String),

    /// No runtime-advertised candidate matched the preference list.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// GPU instance/device creation through the runtime failed.
    #[error("device interop error: {0}")]
    Interop(String),

    #[error("session creation failed: {0}")]
    SessionCreationFailed(String),

    /// A single native call failed.
    #[error("{op} failed: {code}")]
    Runtime { op: &'static str, code: ResultCode },

    /// begin/end frame calls did not alternate.
    #[error("frame protocol violation: {0}")]
    FrameProtocol(String),

    #[error("session not running")]
    SessionNotRunning,

    #[error("pose action already registered: {0}")]
    DuplicatePoseAction(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XrError {
    pub fn capability_unsupported(msg: impl fmt::Display) -> Self {
        Self::CapabilityUnsupported(msg.to_string())
    }

    pub fn instance_creation(msg: impl fmt::Display) -> Self {
        Self::InstanceCreationFailed(msg.to_string())
    }

    pub fn unsupported(msg: impl fmt::Display) -> Self {
        Self::Unsupported(msg.to_string())
    }

    pub fn interop(msg: impl fmt::Display) -> Self {
        Self::Interop(msg.to_string())
    }

    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    pub fn config(msg: impl fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn frame_protocol(msg: impl fmt::Display) -> Self {
        Self::FrameProtocol(msg.to_string())
    }

    /// Whether this error was raised by a native call rather than by the core.
    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime { .. })
    }
}

/// Report a failed native call through the diagnostic sink and turn it into an [`XrError`].
pub(crate) fn runtime_failure(op: &'static str, code: ResultCode) -> XrError {
    tracing::error!(op, result = %code.name, raw = code.raw, "runtime call failed");
    XrError::Runtime { op, code }
}

/// Extension trait mapping [`RtResult`] into [`XrResult`] with logging.
pub(crate) trait RtResultExt<T> {
    fn op(self, op: &'static str) -> XrResult<T>;
}

impl<T> RtResultExt<T> for RtResult<T> {
    fn op(self, op: &'static str) -> XrResult<T> {
        self.map_err(|code| runtime_failure(op, code))
    }
}
