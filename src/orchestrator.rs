//! The Orchestrator (spec §4.4): owns the current game, settings, the
//! sensor, the engine, and the remote-peer link; runs the single-threaded
//! event loop all state mutation happens on.

use crate::config::Config;
use crate::engine_adapter::ChessEngine;
use crate::error::{CoreError, CoreInvariant, ProtocolError};
use crate::game::{Game, GameResult, PlayerType};
use crate::occupancy::Occupancy;
use crate::remote_peer::messages::{
    BoardStateJson, GameJson, RetPgnFilePayload, SettingsJson, StateChangedPayload, player_type_to_json,
};
use crate::remote_peer::reader::RemoteRequest;
use crate::remote_peer::writer::OutboundMessage;
use crate::rules::{ChessMove, Color};
use crate::sensor::BoardSensorSource;
use crate::state_machine::active_game::{self, InnerState};
use crate::state_machine::{self, Ctx, Event, Notification, OuterState};
use crate::storage::{self, EngineColor, EngineSettings, Settings};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Runs every operation on the event-loop thread (spec §5): the only thread
/// allowed to touch `game`/`outer`/`settings`.
pub struct Orchestrator {
    config: Config,
    settings: Settings,
    engine_settings: EngineSettings,
    game: Game,
    outer: OuterState,
    sensor: Arc<Mutex<dyn BoardSensorSource>>,
    engine: Arc<Mutex<dyn ChessEngine>>,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    outbound_tx: Option<UnboundedSender<OutboundMessage>>,
    last_board: Occupancy,
    max_pieces_seen: u32,
    next_token: u64,
    games_to_upload: usize,
    owner_thread: std::thread::ThreadId,
    dispatching: bool,
    /// Set by a violated invariant (spec §7e); checked by `run` after every
    /// dispatched event. `CoreError` rather than the narrower
    /// `CoreInvariant` since this is the one place the orchestrator surfaces
    /// an error that could, in principle, belong to any of the taxonomy's
    /// categories.
    fatal: Option<CoreError>,
}

impl Orchestrator {
    pub fn new(config: Config, sensor: Arc<Mutex<dyn BoardSensorSource>>, engine: Arc<Mutex<dyn ChessEngine>>) -> Self {
        let settings = storage::read_settings(&config.settings_path).unwrap_or_else(|err| {
            log::warn!("failed to read settings, using defaults: {err}");
            Settings::default()
        });
        let engine_settings = storage::read_engine_settings(&config.engine_settings_path).unwrap_or_else(|err| {
            log::warn!("failed to read engine settings, using defaults: {err}");
            EngineSettings::default()
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let game = Self::default_game(&settings, &engine_settings);
        Self {
            config,
            settings,
            engine_settings,
            game,
            outer: OuterState::WaitingForSetup,
            sensor,
            engine,
            events_tx,
            events_rx,
            outbound_tx: None,
            last_board: Occupancy::EMPTY,
            max_pieces_seen: 0,
            next_token: 0,
            games_to_upload: 0,
            owner_thread: std::thread::current().id(),
            dispatching: false,
            fatal: None,
        }
    }

    /// A channel the sensor thread and the remote-peer reader post events
    /// onto.
    pub fn events_sender(&self) -> UnboundedSender<Event> {
        self.events_tx.clone()
    }

    /// Installs the outbound channel for the current remote-peer
    /// connection, pushing the full initial state (spec §6.3 "on
    /// connection established, the server pushes the full state").
    pub fn attach_remote_peer(&mut self, outbound_tx: UnboundedSender<OutboundMessage>) {
        let payload = self.full_state_payload();
        let _ = outbound_tx.send(OutboundMessage::StateChanged(payload));
        self.outbound_tx = Some(outbound_tx);
    }

    pub fn detach_remote_peer(&mut self) {
        self.outbound_tx = None;
    }

    fn default_game(settings: &Settings, engine_settings: &EngineSettings) -> Game {
        let (white, black) = Self::player_assignment(engine_settings);
        Game::new(Self::new_game_id(), white, black, engine_settings.engine_level, settings.learning_mode)
    }

    fn player_assignment(engine_settings: &EngineSettings) -> (PlayerType, PlayerType) {
        if !engine_settings.enable_engine {
            return (PlayerType::Human, PlayerType::Human);
        }
        match engine_settings.engine_color {
            EngineColor::White => (PlayerType::Engine, PlayerType::Human),
            EngineColor::Black => (PlayerType::Human, PlayerType::Engine),
        }
    }

    fn new_game_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Runs the event loop until the power-off timer fires (spec §4.1
    /// `WaitingToPowerOff`).
    pub async fn run(&mut self, mut remote_requests_rx: UnboundedReceiver<RemoteRequest>) {
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => {
                            self.dispatch(event);
                            if let Some(invariant) = self.fatal.take() {
                                log::error!("fatal invariant violation, stopping event loop: {invariant}");
                                self.shutdown();
                                return;
                            }
                            if self.outer.wants_shutdown() {
                                log::info!("power-off timer fired, stopping event loop");
                                self.shutdown();
                                return;
                            }
                        }
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
                request = remote_requests_rx.recv() => {
                    match request {
                        Some(request) => self.handle_remote_request(request),
                        None => {}
                    }
                }
            }
        }
    }

    /// Re-persists settings on clean shutdown (§F.1), not only on an
    /// explicit `update_settings` call.
    pub fn shutdown(&mut self) {
        if let Err(err) = storage::write_settings(&self.config.settings_path, &self.settings) {
            log::warn!("failed to persist settings on shutdown: {err}");
        }
        log::info!("orchestrator shutting down, settings persisted");
    }

    fn dispatch(&mut self, event: Event) {
        if std::thread::current().id() != self.owner_thread {
            self.fatal = Some(CoreInvariant::WrongThread("dispatch").into());
            return;
        }
        if self.dispatching {
            self.fatal = Some(CoreInvariant::TransitionFromReleasedState.into());
            return;
        }
        self.dispatching = true;

        let learning_mode = self.settings.learning_mode;
        let enable_engine = self.engine_settings.enable_engine;
        let engine_color = self.engine_settings.engine_color;
        let engine_level = self.engine_settings.engine_level;
        let new_game = move || {
            let (white, black) = if enable_engine {
                match engine_color {
                    EngineColor::White => (PlayerType::Engine, PlayerType::Human),
                    EngineColor::Black => (PlayerType::Human, PlayerType::Engine),
                }
            } else {
                (PlayerType::Human, PlayerType::Human)
            };
            Game::new(Self::new_game_id(), white, black, engine_level, learning_mode)
        };

        if let Event::BoardChanged(board) = &event {
            self.last_board = *board;
            self.max_pieces_seen = self.max_pieces_seen.max(board.popcount());
        }

        let mut notifications = Vec::new();
        {
            let mut sensor_guard = self.sensor.lock().expect("sensor mutex poisoned");
            let mut ctx = Ctx {
                sensor: &mut *sensor_guard,
                game: &mut self.game,
                events_tx: &self.events_tx,
                config: &self.config,
                engine: Arc::clone(&self.engine),
                max_pieces_seen: &mut self.max_pieces_seen,
                next_token: &mut self.next_token,
                notifications: &mut notifications,
                new_game: &new_game,
            };
            self.outer = std::mem::take(&mut self.outer).step(event, &mut ctx);
        }
        self.dispatching = false;
        self.handle_notifications(notifications);
    }

    fn handle_notifications(&mut self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::MoveCommitted => self.on_game_move(),
                Notification::GameEnded { ended_game } => self.on_game_end(*ended_game),
            }
        }
    }

    /// Replaces the current state, invoking the new state against the
    /// last-seen board snapshot (spec §4.4 `go_to_state`).
    pub fn go_to_state(&mut self, state: OuterState) {
        self.outer = state;
        self.dispatch(Event::BoardChanged(self.last_board));
    }

    fn on_game_move(&mut self) {
        self.broadcast(StateChangedPayload { board_state: Some(self.board_state_json()), ..Default::default() });
    }

    fn on_game_end(&mut self, ended_game: Game) {
        if ended_game.is_persistable() {
            match storage::write_pgn(&self.config.pgn_active_dir, ended_game.id(), &ended_game.pgn()) {
                Ok(_) => {
                    self.games_to_upload += 1;
                    log::info!("archived finished game {}", ended_game.id());
                }
                Err(err) => {
                    log::warn!("failed to persist finished game {}: {err}", ended_game.id());
                    self.report_error(err.to_string());
                }
            }
        }
        self.broadcast(StateChangedPayload {
            game_active: Some(false),
            games_to_upload: Some(self.games_to_upload),
            ..Default::default()
        });
    }

    fn board_state_json(&self) -> BoardStateJson {
        let position = self.game.position();
        BoardStateJson {
            fen: position.fen(),
            pgn: self.game.pgn(),
            last_move: self.game.last_move().map(|m| m.uci.clone()),
            move_count: self.game.half_move_count(),
            should_send_move: self.game.last_move().is_some_and(|m| !m.is_forced),
        }
    }

    fn full_state_payload(&self) -> StateChangedPayload {
        StateChangedPayload {
            game_active: Some(!self.game.is_over()),
            games_to_upload: Some(self.games_to_upload),
            game: Some(GameJson {
                game_id: self.game.id().to_string(),
                engine_level: self.game.engine_skill(),
                white: player_type_to_json(self.game.player(Color::White)).to_string(),
                black: player_type_to_json(self.game.player(Color::Black)).to_string(),
            }),
            board_state: Some(self.board_state_json()),
            settings: Some(SettingsJson { learning_mode: self.settings.learning_mode }),
        }
    }

    fn broadcast(&self, payload: StateChangedPayload) {
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(OutboundMessage::StateChanged(payload));
        }
    }

    fn report_error(&self, message: impl Into<String>) {
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(OutboundMessage::OnError(message.into()));
        }
    }

    fn handle_remote_request(&mut self, request: RemoteRequest) {
        match request {
            RemoteRequest::WritePreferences { learning_mode } => self.update_settings(learning_mode),
            RemoteRequest::StartNormalGame { enable_engine, engine_color, engine_level, game_id, start_fen } => {
                let color = match engine_color {
                    Color::White => EngineColor::White,
                    Color::Black => EngineColor::Black,
                };
                if let Err(err) = self.on_game_start_request(enable_engine, color, engine_level, game_id, start_fen) {
                    self.report_error(err.to_string());
                }
            }
            RemoteRequest::ForceBluetoothMoves { game_id, client_color, moves, forced_winner } => {
                if let Err(err) = self.force_bluetooth_moves(&game_id, client_color, &moves, forced_winner) {
                    self.report_error(err);
                }
            }
            RemoteRequest::RequestPgnFiles => self.send_pgn_files(None),
            RemoteRequest::RequestArchivePgnFile { all, name } => self.archive_pgn_files(all, name.as_deref()),
            RemoteRequest::TestLeds => self.test_leds(),
            RemoteRequest::Connected { outbound_tx } => self.attach_remote_peer(outbound_tx),
            RemoteRequest::Disconnected => self.detach_remote_peer(),
        }
    }

    /// spec §4.4 `update_settings`.
    pub fn update_settings(&mut self, learning_mode: Option<bool>) {
        if let Some(learning_mode) = learning_mode {
            self.settings.learning_mode = learning_mode;
        }
        if let Err(err) = storage::write_settings(&self.config.settings_path, &self.settings) {
            log::warn!("failed to persist settings: {err}");
            self.report_error(format!("failed to persist settings: {err}"));
        }
        self.game.set_learning_mode(self.settings.learning_mode);
        self.dispatch(Event::BoardChanged(self.last_board));
    }

    /// spec §4.4 `force_bluetooth_moves` / §4.3.
    pub fn force_bluetooth_moves(
        &mut self,
        game_id: &str,
        client_color: Color,
        moves: &str,
        forced_winner: Option<GameResult>,
    ) -> Result<(), String> {
        if self.game.id() != game_id {
            let remote_color = client_color.opponent();
            let (white, black) = match remote_color {
                Color::White => (PlayerType::RemotePeer, PlayerType::Human),
                Color::Black => (PlayerType::Human, PlayerType::RemotePeer),
            };
            self.game = Game::new(
                game_id.to_string(),
                white,
                black,
                self.engine_settings.engine_level,
                self.settings.learning_mode,
            );
            self.outer = OuterState::WaitingForSetup;
        }

        let suffix = self.game.force_moves(moves, forced_winner)?;
        let Some(suffix) = suffix else { return Ok(()) };

        let learning_mode = self.settings.learning_mode;
        let enable_engine = self.engine_settings.enable_engine;
        let engine_color = self.engine_settings.engine_color;
        let engine_level = self.engine_settings.engine_level;
        let new_game = move || {
            let (white, black) = if enable_engine {
                match engine_color {
                    EngineColor::White => (PlayerType::Engine, PlayerType::Human),
                    EngineColor::Black => (PlayerType::Human, PlayerType::Engine),
                }
            } else {
                (PlayerType::Human, PlayerType::Human)
            };
            Game::new(Self::new_game_id(), white, black, engine_level, learning_mode)
        };

        let mut notifications = Vec::new();
        let remaining: VecDeque<ChessMove> = suffix.into();
        {
            let mut sensor_guard = self.sensor.lock().expect("sensor mutex poisoned");
            let mut ctx = Ctx {
                sensor: &mut *sensor_guard,
                game: &mut self.game,
                events_tx: &self.events_tx,
                config: &self.config,
                engine: Arc::clone(&self.engine),
                max_pieces_seen: &mut self.max_pieces_seen,
                next_token: &mut self.next_token,
                notifications: &mut notifications,
                new_game: &new_game,
            };
            let inner = active_game::enter_force_multiple_moves(remaining, forced_winner, &mut ctx);
            self.outer = OuterState::ActiveGame(inner);
        }
        self.handle_notifications(notifications);
        Ok(())
    }

    /// spec §4.4 `on_game_start_request`.
    pub fn on_game_start_request(
        &mut self,
        enable_engine: bool,
        engine_color: EngineColor,
        engine_level: u8,
        game_id: Option<String>,
        start_fen: Option<String>,
    ) -> Result<(), ProtocolError> {
        if !(1..=20).contains(&engine_level) {
            return Err(ProtocolError::InvalidEnumValue { field: "engineLevel", value: engine_level.to_string() });
        }
        if let Some(id) = &game_id
            && self.game.id() == id
        {
            return Ok(());
        }

        self.engine_settings = EngineSettings { enable_engine, engine_color, engine_level };
        if let Err(err) = storage::write_engine_settings(&self.config.engine_settings_path, &self.engine_settings) {
            log::warn!("failed to persist engine settings: {err}");
        }

        let id = game_id.unwrap_or_else(Self::new_game_id);
        let (white, black) = Self::player_assignment(&self.engine_settings);
        let learning_mode = self.settings.learning_mode;
        self.game = match start_fen {
            Some(fen) => Game::from_fen(id.clone(), &fen, white, black, engine_level, learning_mode)
                .ok_or_else(|| ProtocolError::InvalidEnumValue { field: "startFen", value: fen.clone() })?,
            None => Game::new(id, white, black, engine_level, learning_mode),
        };
        self.go_to_state(OuterState::WaitingForSetup);
        Ok(())
    }

    /// spec §4.4 `test_leds`.
    pub fn test_leds(&mut self) {
        let learning_mode = self.settings.learning_mode;
        let enable_engine = self.engine_settings.enable_engine;
        let engine_color = self.engine_settings.engine_color;
        let engine_level = self.engine_settings.engine_level;
        let new_game = move || {
            let (white, black) = if enable_engine {
                match engine_color {
                    EngineColor::White => (PlayerType::Engine, PlayerType::Human),
                    EngineColor::Black => (PlayerType::Human, PlayerType::Engine),
                }
            } else {
                (PlayerType::Human, PlayerType::Human)
            };
            Game::new(Self::new_game_id(), white, black, engine_level, learning_mode)
        };
        let mut notifications = Vec::new();
        let previous = std::mem::take(&mut self.outer);
        {
            let mut sensor_guard = self.sensor.lock().expect("sensor mutex poisoned");
            let mut ctx = Ctx {
                sensor: &mut *sensor_guard,
                game: &mut self.game,
                events_tx: &self.events_tx,
                config: &self.config,
                engine: Arc::clone(&self.engine),
                max_pieces_seen: &mut self.max_pieces_seen,
                next_token: &mut self.next_token,
                notifications: &mut notifications,
                new_game: &new_game,
            };
            self.outer = state_machine::enter_led_test(previous, &mut ctx);
        }
        self.handle_notifications(notifications);
    }

    fn send_pgn_files(&self, name: Option<&str>) {
        let Some(tx) = &self.outbound_tx else { return };
        match name {
            Some(name) => match storage::read_pgn(&self.config.pgn_active_dir, name) {
                Ok(pgn) => {
                    let _ = tx.send(OutboundMessage::RetPgnFile(RetPgnFilePayload { name: name.to_string(), pgn }));
                }
                Err(err) => {
                    let _ = tx.send(OutboundMessage::OnError(err.to_string()));
                }
            },
            None => {
                match storage::saved_games(&self.config.pgn_active_dir) {
                    Ok(names) => {
                        for name in names {
                            if let Ok(pgn) = storage::read_pgn(&self.config.pgn_active_dir, &name) {
                                let _ = tx.send(OutboundMessage::RetPgnFile(RetPgnFilePayload { name, pgn }));
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(OutboundMessage::OnError(err.to_string()));
                    }
                }
                let _ = tx.send(OutboundMessage::PgnFilesDone);
            }
        }
    }

    /// spec §6.4 `REQUEST_ARCHIVE_PGN_FILE`: moves one or all saved games
    /// from the active directory into the archive directory, decrementing
    /// `games_to_upload` for each file actually moved.
    fn archive_pgn_files(&mut self, all: bool, name: Option<&str>) {
        let names = if all {
            match storage::saved_games(&self.config.pgn_active_dir) {
                Ok(names) => names,
                Err(err) => {
                    self.report_error(err.to_string());
                    return;
                }
            }
        } else {
            match name {
                Some(name) => vec![name.to_string()],
                None => Vec::new(),
            }
        };

        let mut archived = 0;
        for name in &names {
            match storage::archive_file(&self.config.pgn_active_dir, &self.config.pgn_archive_dir, name) {
                Ok(()) => archived += 1,
                Err(err) => self.report_error(err.to_string()),
            }
        }

        if archived > 0 {
            self.games_to_upload = self.games_to_upload.saturating_sub(archived);
            self.broadcast(StateChangedPayload { games_to_upload: Some(self.games_to_upload), ..Default::default() });
        }
    }

    pub fn is_game_active(&self) -> bool {
        !self.game.is_over()
    }

    /// True once the board has matched the authoritative position (i.e. the
    /// outer state has left `WaitingForSetup`), supplemental to spec §4.4's
    /// named operations but needed wherever an embedder wants to know
    /// whether a game is already under way.
    pub fn is_game_started(&self) -> bool {
        matches!(self.outer, OuterState::ActiveGame(_))
    }
}
