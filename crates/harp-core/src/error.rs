//! Error types for remote model operations
//!
//! Every fallible operation in the client and session layers returns a
//! [`HarpError`]. The error carries a kind from a fixed taxonomy, the HTTP
//! status that caused it (0 when there was none), a developer message for
//! logs and a user message for alerts.

use thiserror::Error;

/// Error taxonomy
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("Invalid URL")]
    InvalidUrl,

    #[error("Missing JSON key")]
    MissingJsonKey,

    #[error("JSON parse error")]
    JsonParseError,

    #[error("File upload error")]
    FileUploadError,

    #[error("File download error")]
    FileDownloadError,

    #[error("HTTP request error")]
    HttpRequestError,

    #[error("Unsupported control type")]
    UnsupportedControlType,

    #[error("Unknown label type")]
    UnknownLabelType,

    /// The operation observed a cancellation request and stopped early
    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown error")]
    UnknownError,
}

/// An error from a client, session or scheduler operation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {dev_message}")]
pub struct HarpError {
    pub kind: ErrorKind,
    /// HTTP status code, 0 if the failure was not an HTTP response
    pub code: u16,
    pub dev_message: String,
    pub user_message: String,
}

/// Result type for HARP operations
pub type Result<T> = std::result::Result<T, HarpError>;

impl HarpError {
    pub fn new(kind: ErrorKind, dev_message: impl Into<String>) -> Self {
        Self {
            kind,
            code: 0,
            dev_message: dev_message.into(),
            user_message: String::new(),
        }
    }

    /// Attach the HTTP status code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    /// Replace the developer message, keeping kind and code
    pub fn with_dev_message(mut self, message: impl Into<String>) -> Self {
        self.dev_message = message.into();
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Operation cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Derive a user-facing message from the status code and developer message
    ///
    /// An explicit user message set by the caller is kept.
    pub fn fill_user_message(&mut self) {
        if !self.user_message.is_empty() {
            return;
        }

        let lower = self.dev_message.to_lowercase();
        self.user_message = if self.code == 503 || lower.contains("503") {
            "The model appears to be sleeping or temporarily unavailable (HTTP 503). \
             It may take a minute to wake up; please try again shortly."
                .to_string()
        } else if lower.contains("timed out") || lower.contains("timeout") {
            "The request to the model timed out. The server may be busy or waking up; \
             please try again."
                .to_string()
        } else if self.kind == ErrorKind::InvalidUrl {
            format!(
                "The model address is invalid. Use a Hugging Face space (user/model), \
                 a *.hf.space or localhost URL, or stability/<service>. ({})",
                self.dev_message
            )
        } else if self.kind == ErrorKind::Cancelled {
            "Processing was cancelled.".to_string()
        } else {
            self.dev_message.clone()
        };
    }

    /// Builder form of [`HarpError::fill_user_message`]
    pub fn filled(mut self) -> Self {
        self.fill_user_message();
        self
    }
}

impl From<std::io::Error> for HarpError {
    fn from(e: std::io::Error) -> Self {
        HarpError::new(ErrorKind::UnknownError, format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for HarpError {
    fn from(e: serde_json::Error) -> Self {
        HarpError::new(ErrorKind::JsonParseError, format!("Failed to parse JSON: {}", e))
    }
}

impl From<hound::Error> for HarpError {
    fn from(e: hound::Error) -> Self {
        HarpError::new(ErrorKind::UnknownError, format!("WAV error: {}", e))
    }
}

impl From<ureq::Error> for HarpError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                HarpError::new(
                    ErrorKind::HttpRequestError,
                    format!("Request failed with status code: {} {}", code, body.trim()),
                )
                .with_code(code)
            }
            ureq::Error::Transport(transport) => {
                HarpError::new(ErrorKind::HttpRequestError, transport.to_string())
            }
        }
    }
}
