//! The writer half of the Remote Peer Link (spec §5): owns its own outbound
//! queue so `socket.send` is never called concurrently with itself.

use super::messages::{OnErrorPayload, RetPgnFilePayload, ServerAction, StateChangedPayload};
use super::write_frame;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    StateChanged(StateChangedPayload),
    RetPgnFile(RetPgnFilePayload),
    PgnFilesDone,
    OnError(String),
}

impl OutboundMessage {
    fn encode(&self) -> (i8, String) {
        match self {
            OutboundMessage::StateChanged(payload) => {
                (ServerAction::StateChanged.tag(), serde_json::to_string(payload).unwrap_or_default())
            }
            OutboundMessage::RetPgnFile(payload) => {
                (ServerAction::RetPgnFile.tag(), serde_json::to_string(payload).unwrap_or_default())
            }
            OutboundMessage::PgnFilesDone => (ServerAction::PgnFilesDone.tag(), "{}".to_string()),
            OutboundMessage::OnError(message) => {
                let payload = OnErrorPayload { message: message.clone() };
                (ServerAction::OnError.tag(), serde_json::to_string(&payload).unwrap_or_default())
            }
        }
    }
}

/// Drains `outbound_rx`, writing each message as a frame. Once the
/// connection drops, remaining sends become no-ops (spec §7a): the loop
/// simply exits and the channel's remaining messages are dropped.
pub async fn run<W: AsyncWriteExt + Unpin>(mut writer: W, mut outbound_rx: UnboundedReceiver<OutboundMessage>) {
    while let Some(message) = outbound_rx.recv().await {
        let (tag, payload) = message.encode();
        if let Err(err) = write_frame(&mut writer, tag, &payload).await {
            log::warn!("remote peer write failed, dropping connection: {err}");
            return;
        }
    }
}
