//! Inbound events delivered by a chat bus.

use keydesk_core::{ChannelId, UserId};
use serde::{Deserialize, Serialize};

/// A plain text message posted by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEvent {
    pub channel: ChannelId,
    pub user: UserId,
    pub text: String,
}

impl TextEvent {
    pub fn new(channel: impl Into<ChannelId>, user: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            text: text.into(),
        }
    }
}

/// Everything a connected event stream can yield.
///
/// The session controller matches this exhaustively; adapters map whatever
/// their platform sends onto these four cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A user message.
    Text(TextEvent),

    /// The platform rejected our credentials. Not retryable.
    AuthError {
        /// Platform-provided reason
        reason: String,
    },

    /// The connection is broken. The stream should be torn down and
    /// re-established.
    TransportError {
        /// Human-readable description
        message: String,
    },

    /// Anything else (hello, presence, typing, edits).
    Other {
        /// Platform event type, for tracing
        kind: String,
    },
}

impl InboundEvent {
    /// Shorthand for a text event.
    pub fn text(channel: &str, user: &str, text: &str) -> Self {
        Self::Text(TextEvent::new(channel, user, text))
    }

    /// Short label for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::AuthError { .. } => "auth_error",
            Self::TransportError { .. } => "transport_error",
            Self::Other { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_shorthand() {
        let event = InboundEvent::text("C1", "U1", "13借ります");
        match event {
            InboundEvent::Text(ev) => {
                assert_eq!(ev.channel, ChannelId::new("C1"));
                assert_eq!(ev.user, UserId::new("U1"));
                assert_eq!(ev.text, "13借ります");
            }
            other => panic!("expected text event, got {other:?}"),
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(InboundEvent::text("C", "U", "").kind(), "text");
        assert_eq!(
            InboundEvent::AuthError {
                reason: "invalid_auth".to_string()
            }
            .kind(),
            "auth_error"
        );
        assert_eq!(
            InboundEvent::Other {
                kind: "hello".to_string()
            }
            .kind(),
            "hello"
        );
    }
}
