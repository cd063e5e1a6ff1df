use thiserror::Error;

/// Failures of a duplex connection.
///
/// The `Display` text is shown verbatim in the session log, so every
/// variant reads as a complete sentence fragment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// DNS, TCP, TLS or handshake failure while opening
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// Write failure on an established connection
    #[error("failed to send message: {0}")]
    Send(String),

    /// Read failure on an established connection
    #[error("failed to receive message: {0}")]
    Receive(String),

    /// The connection was closed locally or by the peer
    #[error("connection closed{}", .0.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed(Option<String>),
}

impl ConnectionError {
    pub fn connect(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect { target: target.into(), reason: reason.to_string() }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
