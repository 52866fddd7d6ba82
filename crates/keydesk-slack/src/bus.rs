//! [`ChatBus`] implementation for Slack.

use async_trait::async_trait;
use keydesk_core::{ChannelId, UserId};
use keydesk_protocol::{BusError, BusResult, ChannelInfo, ChatBus, EventReceiver};
use tracing::debug;

use crate::client::{SlackClient, SlackConfig};
use crate::socket;

/// Slack workspace connection: Web API for calls, Socket Mode for events.
#[derive(Debug, Clone)]
pub struct SlackBus {
    client: SlackClient,
}

impl SlackBus {
    pub fn new(config: SlackConfig) -> BusResult<Self> {
        Ok(Self {
            client: SlackClient::new(config)?,
        })
    }

    pub fn client(&self) -> &SlackClient {
        &self.client
    }
}

#[async_trait]
impl ChatBus for SlackBus {
    async fn bot_user_id(&self) -> BusResult<UserId> {
        self.client.auth_test().await
    }

    async fn resolve_channel(&self, name: &str) -> BusResult<ChannelId> {
        let channels = self.client.conversations_list().await?;
        debug!(count = channels.len(), "Fetched channel list");
        find_channel(&channels, name)
            .map(|c| c.id.clone())
            .ok_or_else(|| BusError::ChannelNotFound(name.to_string()))
    }

    async fn join_channel(&self, channel: &ChannelId) -> BusResult<()> {
        self.client.conversations_join(channel).await
    }

    async fn list_channels(&self) -> BusResult<Vec<ChannelInfo>> {
        self.client.conversations_list().await
    }

    async fn connect(&self) -> BusResult<EventReceiver> {
        let url = self.client.apps_connections_open().await?;
        socket::open(&url).await
    }

    async fn post_message(&self, channel: &ChannelId, text: &str) -> BusResult<()> {
        self.client.chat_post_message(channel, text).await
    }

    async fn display_name(&self, user: &UserId) -> BusResult<String> {
        self.client.users_info(user).await
    }
}

/// Exact, case-sensitive name match. A leading `#` is tolerated.
fn find_channel<'a>(channels: &'a [ChannelInfo], name: &str) -> Option<&'a ChannelInfo> {
    let name = name.strip_prefix('#').unwrap_or(name);
    channels.iter().find(|c| c.name == name)
}
