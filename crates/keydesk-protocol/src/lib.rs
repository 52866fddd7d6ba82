//! keydesk Protocol - Chat bus abstraction
//!
//! This crate defines what the daemon needs from a chat platform: a stream
//! of inbound events, a way to post text to a channel, and a way to turn a
//! user id into a display name. Platform adapters (Slack) implement
//! [`ChatBus`]; the session controller only ever talks to the trait.

pub mod bus;
pub mod error;
pub mod event;

pub use bus::{resolve_display_name, ChannelInfo, ChatBus, EventReceiver, EVENT_BUFFER};
pub use error::{BusError, BusResult};
pub use event::{InboundEvent, TextEvent};
