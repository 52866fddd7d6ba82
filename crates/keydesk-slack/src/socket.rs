//! Slack Socket Mode event stream.
//!
//! Slack pushes events as JSON envelopes over a WebSocket. Every envelope
//! that carries an `envelope_id` must be acknowledged or Slack redelivers
//! it. A `disconnect` envelope means Slack is about to drop the socket; the
//! stream ends and the session controller reconnects with a fresh URL.
//!
//! ```text
//! ┌──────────────┐  envelopes   ┌──────────────┐  InboundEvent  ┌────────────────┐
//! │ Slack (wss)  │─────────────▶│ reader task  │───────────────▶│ mpsc::Receiver │
//! │              │◀─────────────│ (this module)│                │ (controller)   │
//! └──────────────┘    acks      └──────────────┘                └────────────────┘
//! ```

use futures::{SinkExt, StreamExt};
use keydesk_protocol::{BusError, BusResult, EventReceiver, InboundEvent, TextEvent, EVENT_BUFFER};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Envelope decoding
// ============================================================================

/// Outer Socket Mode frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// The `event` object inside an `events_api` payload.
#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// What to do with one incoming frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FrameAction {
    /// Envelope id to acknowledge.
    pub ack: Option<String>,
    /// Event to forward to the controller.
    pub event: Option<InboundEvent>,
    /// End the stream after handling this frame.
    pub close: bool,
}

/// Decodes one text frame.
pub(crate) fn handle_frame(raw: &str) -> FrameAction {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Ignoring undecodable Socket Mode frame");
            return FrameAction::default();
        }
    };

    let mut action = FrameAction {
        ack: envelope.envelope_id.clone(),
        ..FrameAction::default()
    };

    match envelope.kind.as_str() {
        "hello" => {
            action.event = Some(InboundEvent::Other {
                kind: "hello".to_string(),
            });
        }
        "disconnect" => {
            info!(
                reason = envelope.reason.as_deref().unwrap_or("unspecified"),
                "Slack requested disconnect"
            );
            action.close = true;
        }
        "events_api" => {
            action.event = envelope.payload.as_ref().and_then(message_from_payload);
        }
        other => {
            action.event = Some(InboundEvent::Other {
                kind: other.to_string(),
            });
        }
    }

    action
}

/// Message subtypes that still carry a fresh human post.
const USER_POST_SUBTYPES: [&str; 2] = ["thread_broadcast", "file_share"];

/// Extracts a plain user message from an `events_api` payload.
///
/// Edits, deletions, joins and bot posts all arrive as `message` events with
/// a `subtype` or `bot_id`; only fresh human messages become `Text`. Posts
/// with an attachment or broadcast from a thread count as fresh.
fn message_from_payload(payload: &Value) -> Option<InboundEvent> {
    let event: MessageEvent = serde_json::from_value(payload.get("event")?.clone()).ok()?;

    let user_post = event
        .subtype
        .as_deref()
        .map_or(true, |subtype| USER_POST_SUBTYPES.contains(&subtype));
    if event.kind != "message" || !user_post || event.bot_id.is_some() {
        return Some(InboundEvent::Other {
            kind: event.subtype.unwrap_or(event.kind),
        });
    }

    let (Some(channel), Some(user)) = (event.channel, event.user) else {
        return Some(InboundEvent::Other {
            kind: "message".to_string(),
        });
    };

    Some(InboundEvent::Text(TextEvent::new(
        channel,
        user,
        event.text.unwrap_or_default(),
    )))
}

fn ack_frame(envelope_id: &str) -> Message {
    Message::text(json!({ "envelope_id": envelope_id }).to_string())
}

// ============================================================================
// Connection
// ============================================================================

/// Opens the Socket Mode WebSocket at `url` and starts the reader task.
///
/// The returned receiver yields events until the socket closes; then it
/// returns `None`.
pub async fn open(url: &str) -> BusResult<EventReceiver> {
    let (ws, _response) = connect_async(url).await.map_err(BusError::transport)?;
    info!("Socket Mode connection established");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(read_loop(ws, tx));
    Ok(rx)
}

/// Pumps frames from the socket into `tx` until either side goes away.
async fn read_loop(mut ws: WsStream, tx: mpsc::Sender<InboundEvent>) {
    loop {
        let frame = tokio::select! {
            frame = ws.next() => frame,
            _ = tx.closed() => {
                debug!("Event receiver dropped, closing socket");
                break;
            }
        };

        match frame {
            None => {
                info!("Socket Mode stream ended");
                break;
            }
            Some(Err(e)) => {
                let _ = tx
                    .send(InboundEvent::TransportError {
                        message: e.to_string(),
                    })
                    .await;
                break;
            }
            Some(Ok(Message::Text(text))) => {
                let action = handle_frame(text.as_str());

                if let Some(id) = action.ack.as_deref() {
                    if let Err(e) = ws.send(ack_frame(id)).await {
                        let _ = tx
                            .send(InboundEvent::TransportError {
                                message: format!("ack failed: {e}"),
                            })
                            .await;
                        break;
                    }
                    trace!(envelope_id = id, "Acknowledged envelope");
                }

                if let Some(event) = action.event {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }

                if action.close {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "Socket Mode close frame received");
                break;
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
        }
    }

    let _ = ws.close(None).await;
}

// ============================================================================
// Tests
// ============================================================================
