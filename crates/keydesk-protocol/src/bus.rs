//! The chat bus trait.

use async_trait::async_trait;
use keydesk_core::{ChannelId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{BusResult, InboundEvent};

/// Buffer size for inbound event channels created by adapters.
pub const EVENT_BUFFER: usize = 100;

/// Receiving half of a live event stream. `None` from `recv` means the
/// connection closed.
pub type EventReceiver = mpsc::Receiver<InboundEvent>;

/// A channel the bot can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub is_private: bool,
    pub is_member: bool,
}

/// Connection to a chat platform.
///
/// Implementations must be cheap to share (`Arc<dyn ChatBus>`): the event
/// loop, the overdue monitor and spawned send tasks all hold one.
#[async_trait]
pub trait ChatBus: Send + Sync {
    /// The bot's own user id.
    async fn bot_user_id(&self) -> BusResult<UserId>;

    /// Finds a channel by exact name.
    ///
    /// # Errors
    ///
    /// `BusError::ChannelNotFound` if no visible channel has that name.
    async fn resolve_channel(&self, name: &str) -> BusResult<ChannelId>;

    /// Joins `channel`. Already being a member is success.
    async fn join_channel(&self, channel: &ChannelId) -> BusResult<()>;

    /// Every channel visible to the bot.
    async fn list_channels(&self) -> BusResult<Vec<ChannelInfo>>;

    /// Opens a new event stream. Each call yields a fresh connection.
    async fn connect(&self) -> BusResult<EventReceiver>;

    /// Posts `text` to `channel`.
    async fn post_message(&self, channel: &ChannelId, text: &str) -> BusResult<()>;

    /// Looks up the human-readable name for `user`.
    async fn display_name(&self, user: &UserId) -> BusResult<String>;
}

/// Display name for `user`, falling back to the raw id on any failure.
pub async fn resolve_display_name(bus: &dyn ChatBus, user: &UserId) -> String {
    match bus.display_name(user).await {
        Ok(name) if !name.is_empty() => name,
        Ok(_) => user.to_string(),
        Err(e) => {
            debug!(user = %user, error = %e, "Display name lookup failed, using raw id");
            user.to_string()
        }
    }
}
