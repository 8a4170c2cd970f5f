use thiserror::Error;

/// Faults raised by an accessibility provider or by the process layer.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Protocol-level error taxonomy surfaced to WebDriver clients.
#[derive(Error, Debug)]
pub enum WebDriverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no such window: {0}")]
    NoSuchWindow(String),

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("session not created: {0}")]
    SessionNotCreated(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl WebDriverError {
    /// The W3C error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            WebDriverError::InvalidArgument(_) => "invalid argument",
            WebDriverError::NoSuchWindow(_) => "no such window",
            WebDriverError::NoSuchElement(_) => "no such element",
            WebDriverError::SessionNotCreated(_) => "session not created",
            WebDriverError::UnsupportedOperation(_) => "unsupported operation",
            WebDriverError::UnknownError(_) => "unknown error",
        }
    }

    /// The detail message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            WebDriverError::InvalidArgument(m)
            | WebDriverError::NoSuchWindow(m)
            | WebDriverError::NoSuchElement(m)
            | WebDriverError::SessionNotCreated(m)
            | WebDriverError::UnsupportedOperation(m)
            | WebDriverError::UnknownError(m) => m,
        }
    }
}

impl From<AutomationError> for WebDriverError {
    fn from(err: AutomationError) -> Self {
        match err {
            AutomationError::UnsupportedOperation(m) => WebDriverError::UnsupportedOperation(m),
            AutomationError::InvalidArgument(m) => WebDriverError::InvalidArgument(m),
            other => WebDriverError::UnknownError(other.to_string()),
        }
    }
}
