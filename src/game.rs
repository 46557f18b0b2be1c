//! The `Game` data model (spec §3): starting position, move history, result,
//! per-color player assignment, and the remote-peer move-injection operation
//! (§4.3).

use crate::rules::{ChessMove, Color, PgnHeaders, Position, build_pgn};
use std::collections::HashMap;
use std::fmt;

/// Who controls a color's moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerType {
    Human,
    Engine,
    RemotePeer,
}

impl fmt::Display for PlayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerType::Human => "human",
            PlayerType::Engine => "engine",
            PlayerType::RemotePeer => "bluetooth",
        };
        write!(f, "{s}")
    }
}

/// The game's terminal/non-terminal result, using the PGN result tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Ongoing,
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameResult::Ongoing)
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameResult::Ongoing => "*",
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        };
        write!(f, "{s}")
    }
}

/// A single committed move: its UCI text and whether it was forced (engine
/// or remote-peer injected, rather than chosen by the local player).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub uci: String,
    pub is_forced: bool,
}

/// A chess game in progress or finished: starting position, legal move
/// history, player assignment per color, and engine/learning-mode settings
/// that apply only for this game's lifetime.
#[derive(Debug, Clone)]
pub struct Game {
    id: String,
    starting_fen: String,
    position: Position,
    history: Vec<MoveRecord>,
    result: GameResult,
    white: PlayerType,
    black: PlayerType,
    engine_skill: u8,
    learning_mode: bool,
    repetition_counts: HashMap<String, u8>,
}

impl Game {
    pub fn new(id: String, white: PlayerType, black: PlayerType, engine_skill: u8, learning_mode: bool) -> Self {
        let position = Position::starting();
        let mut repetition_counts = HashMap::new();
        repetition_counts.insert(position.repetition_key(), 1);
        Self {
            id,
            starting_fen: position.fen(),
            position,
            history: Vec::new(),
            result: GameResult::Ongoing,
            white,
            black,
            engine_skill,
            learning_mode,
            repetition_counts,
        }
    }

    /// Builds a game starting from a custom FEN rather than the standard
    /// opening position (spec §6.3 `START_NORMAL_GAME.startFen`). Returns
    /// `None` if `fen` does not parse.
    pub fn from_fen(
        id: String,
        fen: &str,
        white: PlayerType,
        black: PlayerType,
        engine_skill: u8,
        learning_mode: bool,
    ) -> Option<Self> {
        let position = Position::from_fen(fen)?;
        let mut repetition_counts = HashMap::new();
        repetition_counts.insert(position.repetition_key(), 1);
        Some(Self {
            id,
            starting_fen: position.fen(),
            position,
            history: Vec::new(),
            result: GameResult::Ongoing,
            white,
            black,
            engine_skill,
            learning_mode,
            repetition_counts,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn starting_fen(&self) -> &str {
        &self.starting_fen
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    pub fn set_result(&mut self, result: GameResult) {
        self.result = result;
    }

    pub fn is_over(&self) -> bool {
        self.result.is_terminal()
    }

    pub fn player(&self, color: Color) -> PlayerType {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    pub fn side_to_move_player(&self) -> PlayerType {
        self.player(self.position.turn())
    }

    pub fn learning_mode(&self) -> bool {
        self.learning_mode
    }

    pub fn set_learning_mode(&mut self, learning_mode: bool) {
        self.learning_mode = learning_mode;
    }

    pub fn engine_skill(&self) -> u8 {
        self.engine_skill
    }

    pub fn half_move_count(&self) -> usize {
        self.history.len()
    }

    pub fn history_uci(&self) -> Vec<String> {
        self.history.iter().map(|m| m.uci.clone()).collect()
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.history.last()
    }

    /// Commits an already-validated legal move to the position and history.
    /// Callers (the state machine's `ConfirmMove`/`ForceMove` handlers) are
    /// responsible for having obtained `mv` from `self.position()` itself.
    pub fn commit_move(&mut self, mv: ChessMove, is_forced: bool) {
        let uci = mv.uci();
        self.position.make_move(mv);
        self.history.push(MoveRecord { uci, is_forced });
        *self.repetition_counts.entry(self.position.repetition_key()).or_insert(0) += 1;
    }

    /// Threefold-repetition draw claim: the current position (board, side to
    /// move, castling rights, en passant target) has occurred three times.
    pub fn is_threefold_repetition(&self) -> bool {
        self.repetition_counts.get(&self.position.repetition_key()).is_some_and(|&count| count >= 3)
    }

    pub fn fen(&self) -> String {
        self.position.fen()
    }

    pub fn pgn(&self) -> String {
        let headers = PgnHeaders {
            event: "Electronic Chessboard".to_string(),
            site: "?".to_string(),
            round: "1".to_string(),
            white: self.white.to_string(),
            black: self.black.to_string(),
            result: self.result.to_string(),
        };
        build_pgn(&headers, &self.history_uci())
    }

    /// Whether this game is a candidate for archiving on game end (§4.4
    /// `on_game_end`): not every party is a `RemotePeer`, and either the
    /// game is terminal or at least 8 half-moves were played.
    pub fn is_persistable(&self) -> bool {
        let all_remote = self.white == PlayerType::RemotePeer && self.black == PlayerType::RemotePeer;
        !all_remote && (self.result.is_terminal() || self.history.len() >= 8)
    }

    /// Remote-peer move injection (§4.3). Parses `moves_str` as a
    /// space-separated UCI list, validates every move is legal from the
    /// starting position when replayed in sequence, then pops the position
    /// and history back to the longest common prefix with the current
    /// history and returns the suffix of moves still to be force-applied.
    ///
    /// Returns `Ok(None)` when the new list is identical to the current
    /// history and no winner is being forced — no action is required.
    /// Otherwise returns `Ok(Some(suffix))`, the moves the caller should
    /// drive through `ForceMultipleMoves`.
    pub fn force_moves(
        &mut self,
        moves_str: &str,
        forced_winner: Option<GameResult>,
    ) -> Result<Option<Vec<ChessMove>>, String> {
        let tokens: Vec<&str> = moves_str.split_whitespace().collect();

        let mut replay = Position::starting();
        let mut parsed = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let mv = replay
                .find_move_uci(token)
                .ok_or_else(|| format!("illegal or null move in forced list: {token}"))?;
            replay.make_move(mv);
            parsed.push(mv);
        }

        let new_uci: Vec<String> = parsed.iter().map(|m| m.uci()).collect();
        let current_uci = self.history_uci();

        let common_prefix_len = new_uci
            .iter()
            .zip(current_uci.iter())
            .take_while(|(a, b)| a == b)
            .count();

        if new_uci == current_uci && forced_winner.is_none() {
            return Ok(None);
        }

        // Replay to the common prefix from the start (the position has no
        // "pop" primitive, unlike the history vector).
        self.position = Position::starting();
        self.repetition_counts.clear();
        self.repetition_counts.insert(self.position.repetition_key(), 1);
        for mv in parsed.iter().take(common_prefix_len) {
            self.position.make_move(*mv);
            *self.repetition_counts.entry(self.position.repetition_key()).or_insert(0) += 1;
        }
        self.history.truncate(common_prefix_len);

        if let Some(winner) = forced_winner {
            self.result = winner;
        }

        Ok(Some(parsed[common_prefix_len..].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_game() -> Game {
        Game::new("g1".to_string(), PlayerType::Human, PlayerType::RemotePeer, 10, false)
    }

    #[test]
    fn new_game_starts_with_empty_history_and_ongoing_result() {
        let game = new_game();
        assert_eq!(game.half_move_count(), 0);
        assert_eq!(game.result(), GameResult::Ongoing);
        assert!(!game.is_over());
    }

    #[test]
    fn commit_move_appends_history_and_updates_position() {
        let mut game = new_game();
        let mv = game.position().find_move_uci("e2e4").unwrap();
        game.commit_move(mv, false);
        assert_eq!(game.history_uci(), vec!["e2e4".to_string()]);
        assert_eq!(game.position().turn(), Color::Black);
    }

    #[test]
    fn force_moves_common_prefix_replay() {
        let mut game = new_game();
        for uci in ["e2e4", "e7e5", "g1f3"] {
            let mv = game.position().find_move_uci(uci).unwrap();
            game.commit_move(mv, false);
        }
        let suffix = game.force_moves("e2e4 e7e5 b1c3", None).unwrap().expect("history changed");
        assert_eq!(suffix.len(), 1);
        assert_eq!(suffix[0].uci(), "b1c3");
        assert_eq!(game.history_uci(), vec!["e2e4".to_string(), "e7e5".to_string()]);
    }

    #[test]
    fn force_moves_identical_list_without_winner_is_noop() {
        let mut game = new_game();
        let mv = game.position().find_move_uci("e2e4").unwrap();
        game.commit_move(mv, false);
        let result = game.force_moves("e2e4", None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn force_moves_rejects_illegal_move() {
        let mut game = new_game();
        assert!(game.force_moves("e2e5", None).is_err());
    }

    #[test]
    fn is_persistable_requires_eight_half_moves_unless_terminal() {
        let mut game = new_game();
        for uci in ["e2e4", "e7e5", "g1f3"] {
            let mv = game.position().find_move_uci(uci).unwrap();
            game.commit_move(mv, false);
        }
        assert!(!game.is_persistable());
        game.set_result(GameResult::Draw);
        assert!(game.is_persistable());
    }

    #[test]
    fn all_remote_peer_game_is_never_persistable() {
        let mut game = Game::new("g2".to_string(), PlayerType::RemotePeer, PlayerType::RemotePeer, 10, false);
        game.set_result(GameResult::WhiteWins);
        assert!(!game.is_persistable());
    }
}
