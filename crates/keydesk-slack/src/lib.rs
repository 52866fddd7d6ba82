//! Slack adapter for keydesk.
//!
//! Implements [`keydesk_protocol::ChatBus`] on top of two Slack surfaces:
//! - the Web API (`auth.test`, `conversations.*`, `users.info`,
//!   `chat.postMessage`) over HTTPS with `reqwest`
//! - Socket Mode, a WebSocket opened through `apps.connections.open`, for
//!   receiving message events
//!
//! Socket Mode needs an app-level token (`xapp-...`) in addition to the bot
//! token (`xoxb-...`).
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()` in production code. Every Slack
//! failure maps to a [`keydesk_protocol::BusError`].

pub mod bus;
pub mod client;
pub mod socket;

pub use bus::SlackBus;
pub use client::{SlackClient, SlackConfig, DEFAULT_API_BASE_URL};
