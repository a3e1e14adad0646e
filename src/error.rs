use thiserror::Error;

// Basic error handling with thiserror
#[derive(Error, Debug)]
pub enum LoungeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("URL encoding failed: {0}")]
    UrlEncodingFailed(#[from] serde_urlencoded::ser::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed length line, chunk overrun, bad JSON or a batch that is not
    /// a list of `[id, [type, ...args]]` entries.
    #[error("Protocol framing error: {0}")]
    ProtocolFraming(String),

    #[error("Not paired with a screen (no screen id)")]
    NotPaired,

    #[error("Not linked with a screen (no lounge id token)")]
    NotLinked,

    #[error("Not connected (no active session)")]
    NotConnected,

    /// The screen runs a receiver client this library cannot drive.
    #[error("Screen is not supported: {0}")]
    NotSupported(String),

    #[error("Unsupported auth state version {0}")]
    UnsupportedAuthVersion(u32),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request rejected with HTTP {status}: {body}")]
    RequestRejected { status: u16, body: String },
}

impl LoungeError {
    /// True for the precondition errors raised before any network call.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LoungeError::NotPaired | LoungeError::NotLinked | LoungeError::NotConnected
        )
    }

    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        LoungeError::ProtocolFraming(msg.into())
    }
}
