//! Connection lifecycle.
//!
//! The controller owns the event loop:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnected (backoff, retry)
//!                       │              │
//!                       └──────────────┴──────▶ Fatal (run returns Err)
//! ```
//!
//! The overdue monitor starts with the first connection and keeps its
//! schedule across reconnects. Commands are applied to the ledger on the
//! event task in arrival order; replies are queued to one poster task, so a
//! slow post never delays the next event and replies keep message order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keydesk_core::{ChannelId, CommandParser, DomainError, Ledger, UserId};
use keydesk_protocol::{BusError, BusResult, ChatBus, EventReceiver, InboundEvent, TextEvent};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::dispatch::{self, ReplySender};
use crate::monitor::OverdueMonitor;

// ============================================================================
// State and settings
// ============================================================================

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Unrecoverable; `run` has returned or is about to.
    Fatal,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// Values the controller needs from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channel_name: String,
    pub reconnect_backoff: Duration,
    pub overdue_threshold: chrono::Duration,
    pub overdue_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_name: config.channel_name.clone(),
            reconnect_backoff: config.timing.reconnect_backoff(),
            overdue_threshold: config.timing.overdue_threshold(),
            overdue_interval: config.timing.overdue_check_interval(),
        }
    }
}

/// Reasons `run` gives up.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("failed to build command parser: {0}")]
    Parser(#[from] DomainError),
}

impl SessionError {
    /// Maps a bus error to a session error if it cannot be retried.
    fn from_fatal(err: &BusError) -> Option<Self> {
        match err {
            BusError::Auth(reason) => Some(Self::Auth(reason.clone())),
            BusError::ChannelNotFound(name) => Some(Self::ChannelNotFound(name.clone())),
            BusError::Transport(_) | BusError::Api { .. } | BusError::Decode(_) => None,
        }
    }
}

/// Facts resolved once before the first connect.
#[derive(Debug, Clone)]
struct Identity {
    bot_user: UserId,
    channel: ChannelId,
}

/// Why an event stream stopped being consumed.
enum StreamEnd {
    Closed,
    TransportError,
    Fatal(SessionError),
    Cancelled,
}

// ============================================================================
// Controller
// ============================================================================

/// Drives one chat connection at a time, reconnecting until cancelled.
pub struct SessionController {
    bus: Arc<dyn ChatBus>,
    ledger: Arc<Ledger>,
    settings: SessionSettings,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl SessionController {
    pub fn new(
        bus: Arc<dyn ChatBus>,
        ledger: Arc<Ledger>,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            bus,
            ledger,
            settings,
            cancel_token,
            state_tx,
        }
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Runs until cancelled (`Ok`) or until a fatal error (`Err`).
    pub async fn run(&self) -> Result<(), SessionError> {
        info!(channel_name = %self.settings.channel_name, "Session controller starting");

        let Some(identity) = self.bootstrap().await? else {
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        };
        let parser = match CommandParser::new(&identity.bot_user) {
            Ok(parser) => parser,
            Err(e) => {
                self.set_state(ConnectionState::Fatal);
                return Err(e.into());
            }
        };

        let mut workers = Workers::start(self, &identity);
        let result = self.connect_loop(&parser, &identity, &mut workers).await;
        workers.stop().await;

        match &result {
            Ok(()) => {
                self.set_state(ConnectionState::Disconnected);
                info!("Session controller stopped");
            }
            Err(_) => self.set_state(ConnectionState::Fatal),
        }
        result
    }

    /// Connects, serves and reconnects until cancelled or a fatal error.
    async fn connect_loop(
        &self,
        parser: &CommandParser,
        identity: &Identity,
        workers: &mut Workers,
    ) -> Result<(), SessionError> {
        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            match self.bus.connect().await {
                Ok(events) => {
                    self.set_state(ConnectionState::Connected);
                    workers.ensure_monitor(self, identity);
                    match self.consume(events, parser, identity, &workers.replies).await {
                        StreamEnd::Closed => info!("Event stream closed"),
                        StreamEnd::TransportError => {}
                        StreamEnd::Fatal(e) => return Err(e),
                        StreamEnd::Cancelled => return Ok(()),
                    }
                }
                Err(e) => {
                    if let Some(fatal) = SessionError::from_fatal(&e) {
                        error!(error = %e, "Connect failed");
                        return Err(fatal);
                    }
                    warn!(error = %e, "Connect failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if !self.wait_backoff().await {
                return Ok(());
            }
        }
    }

    /// Resolves the bot and channel identities, retrying transient failures.
    /// `Ok(None)` means cancelled.
    async fn bootstrap(&self) -> Result<Option<Identity>, SessionError> {
        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(None);
            }

            self.set_state(ConnectionState::Connecting);
            match self.resolve_identity().await {
                Ok(identity) => {
                    info!(
                        bot_user = %identity.bot_user,
                        channel = %identity.channel,
                        "Resolved bot identity and channel"
                    );
                    return Ok(Some(identity));
                }
                Err(e) => {
                    if let Some(fatal) = SessionError::from_fatal(&e) {
                        error!(error = %e, "Startup failed");
                        self.set_state(ConnectionState::Fatal);
                        return Err(fatal);
                    }
                    warn!(error = %e, "Startup lookup failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if !self.wait_backoff().await {
                return Ok(None);
            }
        }
    }

    async fn resolve_identity(&self) -> BusResult<Identity> {
        let bot_user = self.bus.bot_user_id().await?;
        let channel = self.bus.resolve_channel(&self.settings.channel_name).await?;
        if let Err(e) = self.bus.join_channel(&channel).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(channel = %channel, error = %e, "Failed to join channel, continuing");
        }
        Ok(Identity { bot_user, channel })
    }

    async fn consume(
        &self,
        mut events: EventReceiver,
        parser: &CommandParser,
        identity: &Identity,
        replies: &ReplySender,
    ) -> StreamEnd {
        loop {
            let event = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return StreamEnd::Cancelled,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                return StreamEnd::Closed;
            };

            match event {
                InboundEvent::Text(text) => self.handle_text(text, parser, identity, replies),
                InboundEvent::AuthError { reason } => {
                    error!(reason = %reason, "Chat platform rejected credentials");
                    return StreamEnd::Fatal(SessionError::Auth(reason));
                }
                InboundEvent::TransportError { message } => {
                    warn!(error = %message, "Event stream failed");
                    return StreamEnd::TransportError;
                }
                InboundEvent::Other { kind } => trace!(kind = %kind, "Ignoring event"),
            }
        }
    }

    /// Applies one message to the ledger and queues its reply.
    fn handle_text(
        &self,
        event: TextEvent,
        parser: &CommandParser,
        identity: &Identity,
        replies: &ReplySender,
    ) {
        if event.channel != identity.channel {
            debug!(channel = %event.channel, "Ignoring message from other channel");
            return;
        }
        if event.user == identity.bot_user {
            trace!("Ignoring own message");
            return;
        }

        let command = parser.parse(&event.text, event.user, event.channel);
        let Some(outcome) = dispatch::apply(&self.ledger, &command) else {
            return;
        };
        if replies.send(outcome).is_err() {
            warn!(user = %command.user, "Reply poster is gone, dropping reply");
        }
    }

    /// Sleeps for the reconnect backoff. Returns false if cancelled first.
    async fn wait_backoff(&self) -> bool {
        info!(
            backoff_ms = self.settings.reconnect_backoff.as_millis() as u64,
            "Reconnecting after backoff"
        );
        tokio::select! {
            biased;

            _ = self.cancel_token.cancelled() => false,
            _ = tokio::time::sleep(self.settings.reconnect_backoff) => true,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
    }
}

// ============================================================================
// Background tasks
// ============================================================================

/// Tasks that outlive a single connection: the overdue monitor keeps its
/// schedule across reconnects and the reply poster keeps replies in order.
struct Workers {
    token: CancellationToken,
    monitor: Option<JoinHandle<()>>,
    replies: ReplySender,
    poster: JoinHandle<()>,
}

impl Workers {
    fn start(controller: &SessionController, identity: &Identity) -> Self {
        let (replies, poster) =
            dispatch::spawn_reply_poster(Arc::clone(&controller.bus), identity.channel.clone());
        Self {
            token: controller.cancel_token.child_token(),
            monitor: None,
            replies,
            poster,
        }
    }

    /// Starts the overdue monitor on the first connection only.
    fn ensure_monitor(&mut self, controller: &SessionController, identity: &Identity) {
        if self.monitor.is_some() {
            return;
        }
        let monitor = OverdueMonitor::new(
            Arc::clone(&controller.ledger),
            Arc::clone(&controller.bus),
            identity.channel.clone(),
            controller.settings.overdue_threshold,
            controller.settings.overdue_interval,
        );
        self.monitor = Some(monitor.spawn(self.token.clone()));
    }

    /// Stops the monitor and lets the poster drain queued replies.
    async fn stop(self) {
        self.token.cancel();
        drop(self.replies);

        if let Some(monitor) = self.monitor {
            if let Err(e) = monitor.await {
                warn!(error = %e, "Overdue monitor task failed");
            }
        }
        if let Err(e) = self.poster.await {
            warn!(error = %e, "Reply poster task failed");
        }
    }
}
