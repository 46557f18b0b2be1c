//! The reader half of the Remote Peer Link (spec §5): decodes frames and
//! turns them into Orchestrator-level requests, posted onto the event loop.

use super::messages::{
    ClientAction, ForceBluetoothMovesPayload, RequestArchivePgnFilePayload, StartNormalGamePayload,
    WritePreferencesPayload, color_from_json, winner_from_json,
};
use super::{read_frame, writer::OutboundMessage};
use crate::error::{ProtocolError, TransportError};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

/// A decoded client request, ready for the Orchestrator to act on. Kept
/// separate from the wire payload types so the Orchestrator never has to
/// parse JSON itself.
#[derive(Debug, Clone)]
pub enum RemoteRequest {
    WritePreferences { learning_mode: Option<bool> },
    StartNormalGame {
        enable_engine: bool,
        engine_color: crate::rules::Color,
        engine_level: u8,
        game_id: Option<String>,
        start_fen: Option<String>,
    },
    ForceBluetoothMoves {
        game_id: String,
        client_color: crate::rules::Color,
        moves: String,
        forced_winner: Option<crate::game::GameResult>,
    },
    RequestPgnFiles,
    RequestArchivePgnFile { all: bool, name: Option<String> },
    TestLeds,
    /// Synthesized by the listener loop (not decoded off the wire): a new
    /// connection replaces whatever remote peer the orchestrator was
    /// talking to (spec §6.3 allows exactly one peer at a time).
    Connected { outbound_tx: UnboundedSender<OutboundMessage> },
    Disconnected,
}

fn decode(tag: i8, payload: &str) -> Result<RemoteRequest, ProtocolError> {
    let action = ClientAction::from_tag(tag).ok_or(ProtocolError::UnknownActionTag(tag))?;
    match action {
        ClientAction::WritePreferences => {
            let body: WritePreferencesPayload = serde_json::from_str(payload)?;
            Ok(RemoteRequest::WritePreferences { learning_mode: body.learning_mode })
        }
        ClientAction::StartNormalGame => {
            let body: StartNormalGamePayload = serde_json::from_str(payload)?;
            let engine_color = color_from_json(&body.engine_color).ok_or_else(|| ProtocolError::InvalidEnumValue {
                field: "engineColor",
                value: body.engine_color.clone(),
            })?;
            Ok(RemoteRequest::StartNormalGame {
                enable_engine: body.enable_engine,
                engine_color,
                engine_level: body.engine_level,
                game_id: body.game_id,
                start_fen: body.start_fen,
            })
        }
        ClientAction::ForceBluetoothMoves => {
            let body: ForceBluetoothMovesPayload = serde_json::from_str(payload)?;
            let client_color = color_from_json(&body.client_color).ok_or_else(|| ProtocolError::InvalidEnumValue {
                field: "clientColor",
                value: body.client_color.clone(),
            })?;
            Ok(RemoteRequest::ForceBluetoothMoves {
                game_id: body.game_id,
                client_color,
                moves: body.moves,
                forced_winner: winner_from_json(body.winner.as_deref()),
            })
        }
        ClientAction::RequestPgnFiles => Ok(RemoteRequest::RequestPgnFiles),
        ClientAction::RequestArchivePgnFile => {
            let body: RequestArchivePgnFilePayload = serde_json::from_str(payload)?;
            Ok(RemoteRequest::RequestArchivePgnFile { all: body.all.unwrap_or(false), name: body.name })
        }
        ClientAction::TestLeds => Ok(RemoteRequest::TestLeds),
    }
}

/// Reads frames until disconnection, forwarding decoded requests to
/// `requests_tx`. Protocol errors are reported via `outbound_tx` and do not
/// end the loop; transport errors end it (spec §7a/§7b).
pub async fn run<R: AsyncReadExt + Unpin>(
    mut reader: R,
    requests_tx: UnboundedSender<RemoteRequest>,
    outbound_tx: UnboundedSender<OutboundMessage>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok((tag, payload)) => match decode(tag, &payload) {
                Ok(request) => {
                    if requests_tx.send(request).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    log::warn!("remote peer protocol error: {err}");
                    let _ = outbound_tx.send(OutboundMessage::OnError(err.to_string()));
                }
            },
            Err(TransportError::Disconnected) => {
                log::info!("remote peer disconnected");
                return;
            }
            Err(err) => {
                log::warn!("remote peer transport error: {err}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_test_leds_with_empty_body() {
        let request = decode(5, "{}").unwrap();
        assert!(matches!(request, RemoteRequest::TestLeds));
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = decode(99, "{}").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownActionTag(99)));
    }

    #[test]
    fn rejects_invalid_engine_color() {
        let body = r#"{"enableEngine":true,"engineColor":"purple","engineLevel":5}"#;
        let err = decode(1, body).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnumValue { field: "engineColor", .. }));
    }
}
