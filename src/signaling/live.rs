//! Live channel over a WebSocket, scoped to one call room.
//!
//! Frames are JSON objects tagged by `event`:
//! `{"event":"join","room":"<call id>"}` once after connecting, then
//! `{"event":"code","data":"<payload>"}` in both directions.

use super::{LiveReceiver, SignalPayload};
use crate::session::CallId;
use crate::{CallError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub(crate) enum LiveFrame {
    Join { room: String },
    Code { data: SignalPayload },
}

impl LiveFrame {
    fn to_message(&self) -> Result<Message> {
        serde_json::to_string(self)
            .map(Message::Text)
            .map_err(|e| CallError::Signaling(format!("frame encoding failed: {}", e)))
    }
}

pub struct LiveChannel {
    call_id: CallId,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<Option<LiveReceiver>>,
}

impl LiveChannel {
    /// Connects and joins the room for `call_id`
    pub async fn connect(url: &str, call_id: &CallId) -> Result<Self> {
        info!(call_id = %call_id, "connecting live channel: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| CallError::Signaling(format!("live channel connect failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, out_rx));
        tokio::spawn(Self::receiver_task(read, in_tx));

        let channel = Self {
            call_id: call_id.clone(),
            outbound: out_tx,
            inbound: Mutex::new(Some(in_rx)),
        };
        channel.send_frame(&LiveFrame::Join {
            room: call_id.to_string(),
        })?;
        Ok(channel)
    }

    pub fn send(&self, payload: &SignalPayload) -> Result<()> {
        self.send_frame(&LiveFrame::Code {
            data: payload.clone(),
        })?;
        debug!(call_id = %self.call_id, "live {:?} queued", payload);
        Ok(())
    }

    pub fn subscribe(&self) -> Result<LiveReceiver> {
        self.inbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| CallError::Signaling("live channel already has a subscriber".into()))
    }

    fn send_frame(&self, frame: &LiveFrame) -> Result<()> {
        self.outbound
            .send(frame.to_message()?)
            .map_err(|_| CallError::Signaling("live channel closed".into()))
    }

    async fn sender_task(
        mut write: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send live frame: {}", e);
                break;
            }
        }
        let _ = write.close().await;
        debug!("live sender task terminated");
    }

    async fn receiver_task(
        mut read: SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<SignalPayload>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<LiveFrame>(&text) {
                    Ok(LiveFrame::Code { data }) => {
                        if tx.send(data).is_err() {
                            debug!("live subscriber gone");
                            break;
                        }
                    }
                    Ok(LiveFrame::Join { room }) => {
                        debug!("peer joined room {}", room);
                    }
                    Err(e) => warn!("Ignoring malformed live frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("live channel closed by server");
                    break;
                }
                Err(e) => {
                    error!("live channel error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("live receiver task terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_use_event_tag() {
        let join = serde_json::to_value(LiveFrame::Join { room: "abc".into() }).unwrap();
        assert_eq!(join, serde_json::json!({ "event": "join", "room": "abc" }));

        let code: LiveFrame =
            serde_json::from_str(r#"{"event":"code","data":"payload"}"#).unwrap();
        assert_eq!(
            code,
            LiveFrame::Code {
                data: SignalPayload::new("payload")
            }
        );
    }
}
