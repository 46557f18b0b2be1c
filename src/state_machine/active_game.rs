//! Inner states of `ActiveGame` (spec §4.1): move-by-move progress once a
//! game is under way.

use super::timers::TimerHandle;
use super::{Ctx, Event, Notification, TimerTag};
use crate::game::{GameResult, PlayerType};
use crate::occupancy::Occupancy;
use crate::rules::{ChessMove, Color, PieceKind, Square};
use crate::sensor::LedFrame;
use std::collections::VecDeque;
use std::sync::Arc;

/// What a `ForceMove` does once the physical board catches up: either hand
/// control to the ordinary next-move selection, or resume driving the rest
/// of a `ForceMultipleMoves` queue.
#[derive(Debug)]
pub enum MoveCompletion {
    AdvanceToNextMove,
    ForceMultipleMoves { remaining: VecDeque<ChessMove>, forced_winner: Option<GameResult> },
}

pub enum InnerState {
    PlayerMoveBase,
    PlayerMoveFromSquare { src: u8, legal_dests: Occupancy, capture_square: Option<u8> },
    CompleteMove { mv: ChessMove, occupied_after: Occupancy, changed_indirect: Occupancy },
    ConfirmMove { mv: ChessMove, occupied_after: Occupancy, timer: TimerHandle, token: u64 },
    CalculateEngineMove { token: u64 },
    ForceMove {
        mv: ChessMove,
        occupied_after: Occupancy,
        is_capture: bool,
        capture_picked_up: bool,
        changed_squares: Occupancy,
        on_complete: MoveCompletion,
    },
    IdleState,
    GameEndIndicator { timer: TimerHandle, token: u64 },
    AbortLater { cancel_target: Box<InnerState>, timer: TimerHandle, token: u64 },
}

impl InnerState {
    pub fn on_board_changed(self, board: Occupancy, ctx: &mut Ctx) -> InnerState {
        match self {
            InnerState::PlayerMoveBase => step_player_move_base(board, ctx),
            InnerState::PlayerMoveFromSquare { src, legal_dests, capture_square } => {
                step_player_move_from_square(src, legal_dests, capture_square, board, ctx)
            }
            InnerState::CompleteMove { mv, occupied_after, changed_indirect } => {
                step_complete_move(mv, occupied_after, changed_indirect, board, ctx)
            }
            InnerState::ConfirmMove { mv, occupied_after, timer, token } => {
                step_confirm_move(mv, occupied_after, timer, token, board, ctx)
            }
            // The engine query is in flight; board discrepancies during the
            // wait are not guided (no local player action is expected).
            InnerState::CalculateEngineMove { token } => InnerState::CalculateEngineMove { token },
            InnerState::ForceMove { mv, occupied_after, is_capture, capture_picked_up, changed_squares, on_complete } => {
                step_force_move(mv, occupied_after, is_capture, capture_picked_up, changed_squares, on_complete, board, ctx)
            }
            InnerState::IdleState => {
                let authoritative = ctx.game.position().occupied();
                let (extra, missing) = super::extras_and_missing(board, authoritative);
                ctx.set_leds(LedFrame { fast_primary: extra, fast_secondary: missing, ..Default::default() });
                InnerState::IdleState
            }
            InnerState::GameEndIndicator { timer, token } => InnerState::GameEndIndicator { timer, token },
            InnerState::AbortLater { cancel_target, timer, token } => step_abort_later(cancel_target, timer, token, board, ctx),
        }
    }
}

/// Handles a fired timer that belongs to an inner state. `GameEndFinalize`
/// and `AbortFinalize` are intercepted one layer up (they end the game and
/// leave `ActiveGame` entirely), so only `ConfirmMove` is handled here.
pub fn on_timer_fired(inner: InnerState, tag: TimerTag, token: u64, ctx: &mut Ctx) -> InnerState {
    match (inner, tag) {
        (InnerState::ConfirmMove { mv, occupied_after: _, timer: _, token: state_token }, TimerTag::ConfirmMove) if state_token == token => {
            ctx.game.commit_move(mv, false);
            ctx.notifications.push(Notification::MoveCommitted);
            select_next_move_state(None, ctx)
        }
        (other, _) => other,
    }
}

pub fn on_engine_move_ready(inner: InnerState, mv: Option<ChessMove>, token: u64, ctx: &mut Ctx) -> InnerState {
    match inner {
        InnerState::CalculateEngineMove { token: state_token } if state_token == token => match mv {
            Some(mv) => enter_force_move(mv, MoveCompletion::AdvanceToNextMove, ctx),
            None => {
                log::warn!("engine returned no move for the current position");
                enter_calculate_engine_move(ctx)
            }
        },
        other => other,
    }
}

/// The state entered when `ActiveGame` begins (the board matched the
/// starting position from `WaitingForSetup`, or a forced game was just
/// installed): equivalent to running next-move selection with no move just
/// played.
pub fn enter_game_start(ctx: &mut Ctx) -> InnerState {
    select_next_move_state(None, ctx)
}

pub fn enter_abort_later(cancel_target: InnerState, ctx: &mut Ctx) -> InnerState {
    let token = ctx.fresh_token();
    let timer = TimerHandle::schedule(ctx.config.abort_delay, Event::TimerFired { tag: TimerTag::AbortFinalize, token }, ctx.events_tx.clone());
    InnerState::AbortLater { cancel_target: Box::new(cancel_target), timer, token }
}

/// Drives the remainder of a remote-peer-injected move list (spec §4.3):
/// on entry, advances the queue; if a move remains, enters `ForceMove` for
/// it with completion set to resume this queue, otherwise runs ordinary
/// next-move selection with `forced_winner`.
pub fn enter_force_multiple_moves(mut remaining: VecDeque<ChessMove>, forced_winner: Option<GameResult>, ctx: &mut Ctx) -> InnerState {
    match remaining.pop_front() {
        Some(mv) => enter_force_move(mv, MoveCompletion::ForceMultipleMoves { remaining, forced_winner }, ctx),
        None => select_next_move_state(forced_winner, ctx),
    }
}

// ---------------------------------------------------------------------------
// Next-move selection (spec §4.1 table)
// ---------------------------------------------------------------------------

fn select_next_move_state(forced_winner: Option<GameResult>, ctx: &mut Ctx) -> InnerState {
    if let Some(winner) = forced_winner {
        let (leds, result) = match winner {
            GameResult::WhiteWins => (ctx.game.position().pieces(PieceKind::King, Color::Black), GameResult::WhiteWins),
            GameResult::BlackWins => (ctx.game.position().pieces(PieceKind::King, Color::White), GameResult::BlackWins),
            _ => (ctx.game.position().kings(), GameResult::Draw),
        };
        ctx.game.set_result(result);
        return enter_game_end_indicator(leds, ctx);
    }

    if ctx.game.position().is_checkmate() {
        let loser = ctx.game.position().turn();
        let winner_result = if loser == Color::White { GameResult::BlackWins } else { GameResult::WhiteWins };
        let leds = ctx.game.position().pieces(PieceKind::King, loser);
        ctx.game.set_result(winner_result);
        return enter_game_end_indicator(leds, ctx);
    }
    if ctx.game.position().is_stalemate()
        || ctx.game.position().is_insufficient_material()
        || ctx.game.position().can_claim_fifty_move()
        || ctx.game.is_threefold_repetition()
    {
        let leds = ctx.game.position().kings();
        ctx.game.set_result(GameResult::Draw);
        return enter_game_end_indicator(leds, ctx);
    }

    match ctx.game.side_to_move_player() {
        PlayerType::Engine => enter_calculate_engine_move(ctx),
        PlayerType::Human => InnerState::PlayerMoveBase,
        PlayerType::RemotePeer => InnerState::IdleState,
    }
}

fn enter_game_end_indicator(leds: Occupancy, ctx: &mut Ctx) -> InnerState {
    ctx.set_leds(LedFrame { fast_primary: leds, ..Default::default() });
    let token = ctx.fresh_token();
    let timer = TimerHandle::schedule(ctx.config.game_end_flash_duration, Event::TimerFired { tag: TimerTag::GameEndFinalize, token }, ctx.events_tx.clone());
    InnerState::GameEndIndicator { timer, token }
}

fn enter_calculate_engine_move(ctx: &mut Ctx) -> InnerState {
    ctx.set_leds(LedFrame::default());
    let token = ctx.fresh_token();
    let position = ctx.game.position().clone();
    let skill = ctx.game.engine_skill();
    let engine = Arc::clone(&ctx.engine);
    let events_tx = ctx.events_tx.clone();
    tokio::spawn(async move {
        let mv = crate::engine_adapter::query_move(engine, position, skill).await;
        let _ = events_tx.send(Event::EngineMoveReady { mv, token });
    });
    InnerState::CalculateEngineMove { token }
}

// ---------------------------------------------------------------------------
// PlayerMoveBase
// ---------------------------------------------------------------------------

fn step_player_move_base(board: Occupancy, ctx: &mut Ctx) -> InnerState {
    let authoritative = ctx.game.position().occupied();
    if board == authoritative {
        ctx.set_leds(LedFrame::default());
        return InnerState::PlayerMoveBase;
    }
    let active = ctx.game.position().occupied_co(ctx.game.position().turn());
    let missing_active = authoritative.difference(board).intersect(active);
    if missing_active.popcount() == 1 {
        let src = missing_active.lsb().expect("popcount == 1 implies a set bit");
        let legal_dests = ctx.game.position().legal_dests_from(Square::from_index(src));
        return InnerState::PlayerMoveFromSquare { src, legal_dests, capture_square: None };
    }
    let (extra, missing) = super::extras_and_missing(board, authoritative);
    ctx.set_leds(LedFrame { fast_primary: extra, fast_secondary: missing, ..Default::default() });
    InnerState::PlayerMoveBase
}

// ---------------------------------------------------------------------------
// PlayerMoveFromSquare
// ---------------------------------------------------------------------------

fn step_player_move_from_square(
    src: u8,
    legal_dests: Occupancy,
    mut capture_square: Option<u8>,
    board: Occupancy,
    ctx: &mut Ctx,
) -> InnerState {
    let authoritative = ctx.game.position().occupied();
    let turn = ctx.game.position().turn();
    let active = ctx.game.position().occupied_co(turn);
    let inactive = ctx.game.position().occupied_co(turn.opponent());

    let missing_active = authoritative.difference(board).intersect(active);
    if missing_active != Occupancy::from_square(src) {
        return step_player_move_base(board, ctx);
    }

    let missing_inactive = authoritative.difference(board).intersect(inactive);
    let extra = board.difference(authoritative);

    if capture_square.is_none() && missing_inactive.popcount() == 1 {
        let candidate = missing_inactive.lsb().expect("popcount == 1 implies a set bit");
        if legal_dests.contains(candidate) && extra.is_empty() {
            ctx.set_leds(LedFrame {
                constant: Occupancy::from_square(candidate),
                slow_primary: Occupancy::from_square(src),
                ..Default::default()
            });
            return InnerState::PlayerMoveFromSquare { src, legal_dests, capture_square: Some(candidate) };
        }
    }

    if let Some(capture_sq) = capture_square {
        let src_set = Occupancy::from_square(src);
        if board.symmetric_difference(authoritative).symmetric_difference(src_set).is_empty() {
            // Auto-resolves to the first matching legal move (a pawn
            // reaching the back rank here always promotes to a queen).
            let mv = ctx
                .game
                .position()
                .find_move(Square::from_index(src), Square::from_index(capture_sq))
                .expect("capture destination was already validated against legal_dests");
            return enter_complete_move(mv, ctx);
        }
    }

    if extra.popcount() == 1 && missing_inactive.is_empty() {
        let candidate = extra.lsb().expect("popcount == 1 implies a set bit");
        if legal_dests.contains(candidate) {
            let mv = ctx
                .game
                .position()
                .find_move(Square::from_index(src), Square::from_index(candidate))
                .expect("destination was already validated against legal_dests");
            return enter_complete_move(mv, ctx);
        }
    }

    let constant = if ctx.game.learning_mode() { legal_dests } else { Occupancy::from_square(src) };
    let missing_minus_src = authoritative.difference(board).difference(Occupancy::from_square(src));
    ctx.set_leds(LedFrame {
        constant,
        slow_primary: Occupancy::from_square(src),
        fast_primary: extra,
        fast_secondary: missing_minus_src,
    });
    InnerState::PlayerMoveFromSquare { src, legal_dests, capture_square }
}

// ---------------------------------------------------------------------------
// CompleteMove / ConfirmMove
// ---------------------------------------------------------------------------

fn enter_complete_move(mv: ChessMove, ctx: &mut Ctx) -> InnerState {
    let occupied_before = ctx.game.position().occupied();
    let mut after = ctx.game.position().clone();
    after.make_move(mv);
    let occupied_after = after.occupied();
    let src_dst = Occupancy::from_square(mv.from.index()).with(mv.to.index());
    let changed_indirect = occupied_before.symmetric_difference(occupied_after).difference(src_dst);
    InnerState::CompleteMove { mv, occupied_after, changed_indirect }
}

fn step_complete_move(mv: ChessMove, occupied_after: Occupancy, changed_indirect: Occupancy, board: Occupancy, ctx: &mut Ctx) -> InnerState {
    if board == occupied_after {
        return enter_confirm_move(mv, occupied_after, ctx);
    }
    let wrong = board.symmetric_difference(occupied_after);
    if !changed_indirect.difference(wrong).is_empty() {
        // changed_indirect isn't fully contained in the wrong set: the
        // player touched an unrelated piece.
        return step_player_move_base(board, ctx);
    }
    let (extra, missing) = super::extras_and_missing(board, occupied_after);
    ctx.set_leds(LedFrame { slow_primary: extra, slow_secondary: missing, ..Default::default() });
    InnerState::CompleteMove { mv, occupied_after, changed_indirect }
}

fn enter_confirm_move(mv: ChessMove, occupied_after: Occupancy, ctx: &mut Ctx) -> InnerState {
    ctx.set_leds(LedFrame { constant: Occupancy::from_square(mv.to.index()), ..Default::default() });
    let token = ctx.fresh_token();
    let timer = TimerHandle::schedule(ctx.config.confirm_move_debounce, Event::TimerFired { tag: TimerTag::ConfirmMove, token }, ctx.events_tx.clone());
    InnerState::ConfirmMove { mv, occupied_after, timer, token }
}

fn step_confirm_move(mv: ChessMove, occupied_after: Occupancy, timer: TimerHandle, token: u64, board: Occupancy, ctx: &mut Ctx) -> InnerState {
    if board != occupied_after {
        return step_player_move_base(board, ctx);
    }
    InnerState::ConfirmMove { mv, occupied_after, timer, token }
}

// ---------------------------------------------------------------------------
// ForceMove
// ---------------------------------------------------------------------------

fn enter_force_move(mv: ChessMove, on_complete: MoveCompletion, ctx: &mut Ctx) -> InnerState {
    let occupied_before = ctx.game.position().occupied();
    let is_capture = ctx.game.position().board().get(mv.to).is_some() || mv.is_en_passant;
    let mut after = ctx.game.position().clone();
    after.make_move(mv);
    let occupied_after = after.occupied();
    let src_dst = Occupancy::from_square(mv.from.index()).with(mv.to.index());
    let changed_indirect = occupied_before.symmetric_difference(occupied_after).difference(src_dst);
    let changed_squares = src_dst.union(changed_indirect);
    ctx.set_leds(LedFrame { slow_primary: src_dst, ..Default::default() });
    InnerState::ForceMove { mv, occupied_after, is_capture, capture_picked_up: false, changed_squares, on_complete }
}

fn step_force_move(
    mv: ChessMove,
    occupied_after: Occupancy,
    is_capture: bool,
    mut capture_picked_up: bool,
    changed_squares: Occupancy,
    on_complete: MoveCompletion,
    board: Occupancy,
    ctx: &mut Ctx,
) -> InnerState {
    if !board.contains(mv.to.index()) {
        capture_picked_up = true;
    }

    if board == occupied_after && (!is_capture || capture_picked_up) {
        ctx.game.commit_move(mv, true);
        ctx.notifications.push(Notification::MoveCommitted);
        return match on_complete {
            MoveCompletion::AdvanceToNextMove => select_next_move_state(None, ctx),
            MoveCompletion::ForceMultipleMoves { remaining, forced_winner } => enter_force_multiple_moves(remaining, forced_winner, ctx),
        };
    }

    let wrong = board.symmetric_difference(occupied_after);
    let src_dst = Occupancy::from_square(mv.from.index()).with(mv.to.index());
    if !wrong.intersect(src_dst).is_empty() || (is_capture && !capture_picked_up) {
        let illegal = wrong.difference(changed_squares);
        ctx.set_leds(LedFrame { slow_primary: src_dst, fast_primary: illegal, ..Default::default() });
    } else {
        let indirect = changed_squares.difference(src_dst);
        ctx.set_leds(LedFrame { slow_primary: indirect, ..Default::default() });
    }
    InnerState::ForceMove { mv, occupied_after, is_capture, capture_picked_up, changed_squares, on_complete }
}

// ---------------------------------------------------------------------------
// AbortLater
// ---------------------------------------------------------------------------

fn step_abort_later(cancel_target: Box<InnerState>, timer: TimerHandle, token: u64, board: Occupancy, ctx: &mut Ctx) -> InnerState {
    let authoritative = ctx.game.position().occupied();
    if !super::abort_condition(board, authoritative) {
        return *cancel_target;
    }
    let (extra, missing) = super::extras_and_missing(board, authoritative);
    ctx.set_leds(LedFrame { fast_primary: extra, fast_secondary: missing, ..Default::default() });
    InnerState::AbortLater { cancel_target, timer, token }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine_adapter::FirstLegalMoveEngine;
    use crate::game::Game;
    use crate::sensor::VirtualBoardSensor;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn test_ctx<'a>(
        sensor: &'a mut VirtualBoardSensor,
        game: &'a mut Game,
        config: &'a Config,
        events_tx: &'a mpsc::UnboundedSender<Event>,
        max_pieces_seen: &'a mut u32,
        next_token: &'a mut u64,
        notifications: &'a mut Vec<Notification>,
        new_game: &'a dyn Fn() -> Game,
    ) -> Ctx<'a> {
        Ctx {
            sensor,
            game,
            events_tx,
            config,
            engine: Arc::new(Mutex::new(FirstLegalMoveEngine)),
            max_pieces_seen,
            next_token,
            notifications,
            new_game,
        }
    }

    #[test]
    fn scholars_mate_move_sequence_reaches_confirm_move() {
        let mut sensor = VirtualBoardSensor::new(Occupancy::STARTING_SQUARES);
        let mut game = Game::new("g1".into(), PlayerType::Human, PlayerType::Human, 10, false);
        let config = Config::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut max_pieces_seen = 32u32;
        let mut next_token = 0u64;
        let mut notifications = Vec::new();
        let new_game = || Game::new("g2".into(), PlayerType::Human, PlayerType::Human, 10, false);
        let mut ctx = test_ctx(&mut sensor, &mut game, &config, &tx, &mut max_pieces_seen, &mut next_token, &mut notifications, &new_game);

        let state = InnerState::PlayerMoveBase;
        let board_lift_e2 = Occupancy::STARTING_SQUARES.difference(Occupancy::from_square(Square::from_algebraic("e2").unwrap().index()));
        let state = state.on_board_changed(board_lift_e2, &mut ctx);
        assert!(matches!(state, InnerState::PlayerMoveFromSquare { .. }));

        let board_place_e4 = board_lift_e2.with(Square::from_algebraic("e4").unwrap().index());
        let state = state.on_board_changed(board_place_e4, &mut ctx);
        assert!(matches!(state, InnerState::CompleteMove { .. }));

        let state = state.on_board_changed(board_place_e4, &mut ctx);
        assert!(matches!(state, InnerState::ConfirmMove { .. }));
    }

    #[test]
    fn abort_later_returns_to_cancel_target_once_condition_clears() {
        let mut sensor = VirtualBoardSensor::new(Occupancy::EMPTY);
        let mut game = Game::new("g1".into(), PlayerType::Human, PlayerType::Human, 10, false);
        let config = Config::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut max_pieces_seen = 32u32;
        let mut next_token = 0u64;
        let mut notifications = Vec::new();
        let new_game = || Game::new("g2".into(), PlayerType::Human, PlayerType::Human, 10, false);
        let mut ctx = test_ctx(&mut sensor, &mut game, &config, &tx, &mut max_pieces_seen, &mut next_token, &mut notifications, &new_game);

        let aborted = enter_abort_later(InnerState::PlayerMoveBase, &mut ctx);
        let board = Occupancy::STARTING_SQUARES;
        let recovered = aborted.on_board_changed(board, &mut ctx);
        assert!(matches!(recovered, InnerState::PlayerMoveBase));
    }
}
