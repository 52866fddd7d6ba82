//! Errors surfaced by chat bus implementations.

use thiserror::Error;

/// Chat platform failures.
///
/// `Auth` and `ChannelNotFound` are fatal. Everything else is logged and
/// either ignored (a failed post) or answered with a reconnect.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Credentials were rejected. Retrying cannot help.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network or WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered but refused the call.
    #[error("{method} failed: {code}")]
    Api { method: String, code: String },

    /// No channel with this name is visible to the bot.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// The platform returned something we could not decode.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BusError {
    /// Returns true if retrying cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::ChannelNotFound(_))
    }

    /// Creates a transport error from any displayable error.
    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
