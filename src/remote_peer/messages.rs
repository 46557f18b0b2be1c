//! Wire-level action codes and JSON payload shapes (spec §6.3).

use crate::game::{GameResult, PlayerType};
use crate::rules::Color;
use serde::{Deserialize, Serialize};

/// Client→Server action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    WritePreferences = 0,
    StartNormalGame = 1,
    ForceBluetoothMoves = 2,
    RequestPgnFiles = 3,
    RequestArchivePgnFile = 4,
    TestLeds = 5,
}

impl ClientAction {
    pub fn from_tag(tag: i8) -> Option<Self> {
        Some(match tag {
            0 => ClientAction::WritePreferences,
            1 => ClientAction::StartNormalGame,
            2 => ClientAction::ForceBluetoothMoves,
            3 => ClientAction::RequestPgnFiles,
            4 => ClientAction::RequestArchivePgnFile,
            5 => ClientAction::TestLeds,
            _ => return None,
        })
    }
}

/// Server→Client action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    StateChanged = 0,
    RetPgnFile = 1,
    PgnFilesDone = 2,
    OnError = 3,
}

impl ServerAction {
    pub fn tag(self) -> i8 {
        self as i8
    }
}

pub fn color_to_json(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

pub fn color_from_json(s: &str) -> Option<Color> {
    match s {
        "white" => Some(Color::White),
        "black" => Some(Color::Black),
        _ => None,
    }
}

pub fn player_type_to_json(player: PlayerType) -> &'static str {
    match player {
        PlayerType::Human => "human",
        PlayerType::Engine => "engine",
        PlayerType::RemotePeer => "bluetooth",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePreferencesPayload {
    #[serde(rename = "learningMode")]
    pub learning_mode: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartNormalGamePayload {
    #[serde(rename = "enableEngine")]
    pub enable_engine: bool,
    #[serde(rename = "engineColor")]
    pub engine_color: String,
    #[serde(rename = "engineLevel")]
    pub engine_level: u8,
    #[serde(rename = "gameId")]
    pub game_id: Option<String>,
    #[serde(rename = "startFen")]
    pub start_fen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceBluetoothMovesPayload {
    #[serde(rename = "gameId")]
    pub game_id: String,
    #[serde(rename = "clientColor")]
    pub client_color: String,
    pub moves: String,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestArchivePgnFilePayload {
    pub all: Option<bool>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameJson {
    #[serde(rename = "gameId")]
    pub game_id: String,
    #[serde(rename = "engineLevel")]
    pub engine_level: u8,
    pub white: String,
    pub black: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardStateJson {
    pub fen: String,
    pub pgn: String,
    #[serde(rename = "lastMove", skip_serializing_if = "Option::is_none")]
    pub last_move: Option<String>,
    #[serde(rename = "moveCount")]
    pub move_count: usize,
    #[serde(rename = "shouldSendMove")]
    pub should_send_move: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsJson {
    #[serde(rename = "learningMode")]
    pub learning_mode: bool,
}

/// `STATE_CHANGED`'s body: sparse, every field optional so a partial update
/// (e.g. just `boardState` after a move) need not restate everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateChangedPayload {
    #[serde(rename = "gameActive", skip_serializing_if = "Option::is_none")]
    pub game_active: Option<bool>,
    #[serde(rename = "gamesToUpload", skip_serializing_if = "Option::is_none")]
    pub games_to_upload: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<GameJson>,
    #[serde(rename = "boardState", skip_serializing_if = "Option::is_none")]
    pub board_state: Option<BoardStateJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetPgnFilePayload {
    pub name: String,
    pub pgn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnErrorPayload {
    pub message: String,
}

pub fn winner_from_json(s: Option<&str>) -> Option<GameResult> {
    match s {
        Some("white") => Some(GameResult::WhiteWins),
        Some("black") => Some(GameResult::BlackWins),
        Some("draw") => Some(GameResult::Draw),
        _ => None,
    }
}
