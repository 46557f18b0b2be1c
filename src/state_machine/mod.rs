//! The layered finite-state machine (spec §4.1): an outer state tracks
//! {WaitingForSetup, WaitingToPowerOff, ActiveGame, LedTest}; when the outer
//! state is `ActiveGame`, [`active_game::InnerState`] tracks move-by-move
//! progress.
//!
//! Transitions are expressed as functions that consume the old state by
//! value and return the new one (spec §9: "destruction is by replacement,
//! which calls the leave hook first"). Here the leave hook is `Drop` on
//! [`timers::TimerHandle`]: once a state value is replaced, its timers are
//! dropped and therefore cancelled, with no separate bookkeeping required.

pub mod active_game;
pub mod timers;

use crate::config::Config;
use crate::engine_adapter::ChessEngine;
use crate::game::Game;
use crate::occupancy::Occupancy;
use crate::rules::ChessMove;
use crate::sensor::{BoardSensorSource, LedFrame};
use active_game::InnerState;
use std::sync::{Arc, Mutex};
use timers::TimerHandle;
use tokio::sync::mpsc::UnboundedSender;

/// Identifies which scheduled callback fired, so a stale event (one whose
/// owning state has already been replaced) can be recognized and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTag {
    PowerOffShutdown,
    PowerOffCancel,
    LedTestReturn,
    ConfirmMove,
    GameEndFinalize,
    AbortFinalize,
}

/// Everything that can reach the event loop.
#[derive(Debug)]
pub enum Event {
    BoardChanged(Occupancy),
    TimerFired { tag: TimerTag, token: u64 },
    EngineMoveReady { mv: Option<ChessMove>, token: u64 },
}

/// What a state transition asks the orchestrator to do once control returns
/// to it. Kept separate from `Event` so the state machine never has to know
/// about storage or the remote-peer link.
#[derive(Debug)]
pub enum Notification {
    MoveCommitted,
    /// Carries a snapshot of the game as it stood at the moment it ended,
    /// since `finish_and_restart` immediately replaces `ctx.game` with a
    /// fresh one — by the time the orchestrator drains notifications, the
    /// live `Game` is already the new one.
    GameEnded { ended_game: Box<Game> },
}

/// Borrowed context threaded through every transition function: the
/// external collaborators and shared counters a state may need to act on,
/// assembled fresh by the orchestrator for each event it dispatches.
pub struct Ctx<'a> {
    pub sensor: &'a mut dyn BoardSensorSource,
    pub game: &'a mut Game,
    pub events_tx: &'a UnboundedSender<Event>,
    pub config: &'a Config,
    pub engine: Arc<Mutex<dyn ChessEngine>>,
    pub max_pieces_seen: &'a mut u32,
    pub next_token: &'a mut u64,
    pub notifications: &'a mut Vec<Notification>,
    /// Builds a fresh game with the embedder's current player/engine
    /// assignment; used when a game is replaced after ending or aborting.
    pub new_game: &'a dyn Fn() -> Game,
}

impl Ctx<'_> {
    pub fn fresh_token(&mut self) -> u64 {
        *self.next_token += 1;
        *self.next_token
    }

    pub fn set_leds(&mut self, frame: LedFrame) {
        self.sensor.set_leds(frame);
    }
}

/// `board XOR authoritative` wrong-square sets, split into extras (observed
/// only) and missing (authoritative only) — the glossary's "wrong squares".
pub fn extras_and_missing(board: Occupancy, authoritative: Occupancy) -> (Occupancy, Occupancy) {
    (board.difference(authoritative), authoritative.difference(board))
}

/// `board == 0 OR popcount(board XOR authoritative) > 8` (spec §4.1).
pub fn abort_condition(board: Occupancy, authoritative: Occupancy) -> bool {
    board.is_empty() || board.symmetric_difference(authoritative).popcount() > 8
}

/// The outer state (spec §4.1).
pub enum OuterState {
    /// Entered at boot and after every terminated game.
    WaitingForSetup,
    WaitingToPowerOff {
        shutdown_timer: Option<TimerHandle>,
        shutdown_token: u64,
        /// Set once the shutdown timer has genuinely fired; the
        /// orchestrator checks this after each `step` to decide whether to
        /// stop the event loop.
        shutdown_fired: bool,
        cancel_target: Box<OuterState>,
        cancel_timer: Option<(TimerHandle, u64)>,
    },
    ActiveGame(InnerState),
    LedTest {
        timer: TimerHandle,
        token: u64,
        previous: Box<OuterState>,
    },
}

impl Default for OuterState {
    fn default() -> Self {
        OuterState::WaitingForSetup
    }
}

impl OuterState {
    /// Dispatches one event, returning the (possibly new) state. The value
    /// `self` is consumed; whatever variant is discarded drops its timers.
    pub fn step(self, event: Event, ctx: &mut Ctx) -> OuterState {
        match event {
            Event::BoardChanged(board) => self.on_board_changed(board, ctx),
            Event::TimerFired { tag, token } => self.on_timer_fired(tag, token, ctx),
            Event::EngineMoveReady { mv, token } => self.on_engine_move_ready(mv, token, ctx),
        }
    }

    fn on_board_changed(self, board: Occupancy, ctx: &mut Ctx) -> OuterState {
        match self {
            OuterState::WaitingForSetup => {
                let missing = Occupancy::STARTING_SQUARES.difference(board);
                let extra = board.difference(Occupancy::STARTING_SQUARES);
                if board.is_empty() {
                    return enter_waiting_to_power_off(Box::new(OuterState::WaitingForSetup), ctx);
                }
                if missing.union(extra).is_empty() {
                    return OuterState::ActiveGame(active_game::enter_game_start(ctx));
                }
                ctx.set_leds(LedFrame {
                    slow_primary: extra,
                    slow_secondary: missing,
                    ..Default::default()
                });
                OuterState::WaitingForSetup
            }

            OuterState::WaitingToPowerOff { shutdown_timer, shutdown_token, shutdown_fired, cancel_target, cancel_timer } => {
                if board.is_empty() {
                    // Board emptied again: drop any in-flight cancel timer.
                    OuterState::WaitingToPowerOff { shutdown_timer, shutdown_token, shutdown_fired, cancel_target, cancel_timer: None }
                } else if cancel_timer.is_some() {
                    OuterState::WaitingToPowerOff { shutdown_timer, shutdown_token, shutdown_fired, cancel_target, cancel_timer }
                } else {
                    let token = ctx.fresh_token();
                    let timer =
                        TimerHandle::schedule(ctx.config.power_off_cancel_delay, Event::TimerFired { tag: TimerTag::PowerOffCancel, token }, ctx.events_tx.clone());
                    OuterState::WaitingToPowerOff {
                        shutdown_timer,
                        shutdown_token,
                        shutdown_fired,
                        cancel_target,
                        cancel_timer: Some((timer, token)),
                    }
                }
            }

            OuterState::LedTest { timer, token, previous } => {
                ctx.set_leds(LedFrame { constant: board, ..Default::default() });
                OuterState::LedTest { timer, token, previous }
            }

            OuterState::ActiveGame(inner) => {
                let authoritative = ctx.game.position().occupied();
                if board == Occupancy::STARTING_SQUARES && authoritative != Occupancy::STARTING_SQUARES {
                    return finish_and_restart(ctx);
                }
                if abort_condition(board, authoritative) && !matches!(inner, InnerState::AbortLater { .. }) {
                    return OuterState::ActiveGame(active_game::enter_abort_later(inner, ctx));
                }
                OuterState::ActiveGame(inner.on_board_changed(board, ctx))
            }
        }
    }

    fn on_timer_fired(self, tag: TimerTag, token: u64, ctx: &mut Ctx) -> OuterState {
        match (self, tag) {
            (OuterState::WaitingToPowerOff { shutdown_token, cancel_target, .. }, TimerTag::PowerOffShutdown) if shutdown_token == token => {
                // The orchestrator checks `wants_shutdown` after each step
                // and stops the event loop; this just records that the
                // timer genuinely fired (rather than being stale).
                log::info!("power-off timer fired, requesting event loop stop");
                OuterState::WaitingToPowerOff {
                    shutdown_timer: None,
                    shutdown_token,
                    shutdown_fired: true,
                    cancel_target,
                    cancel_timer: None,
                }
            }
            (
                OuterState::WaitingToPowerOff { shutdown_timer, shutdown_token, shutdown_fired, cancel_target, cancel_timer: Some((_, cancel_token)) },
                TimerTag::PowerOffCancel,
            ) if cancel_token == token => {
                log::debug!("power-off cancelled, returning to prior state");
                let _ = shutdown_timer;
                let _ = shutdown_token;
                let _ = shutdown_fired;
                *cancel_target
            }
            (OuterState::LedTest { token: state_token, previous, .. }, TimerTag::LedTestReturn) if state_token == token => {
                log::debug!("led test finished, returning to prior state");
                *previous
            }
            (OuterState::ActiveGame(InnerState::GameEndIndicator { token: state_token, .. }), TimerTag::GameEndFinalize) if state_token == token => {
                finish_and_restart(ctx)
            }
            (OuterState::ActiveGame(InnerState::AbortLater { token: state_token, .. }), TimerTag::AbortFinalize) if state_token == token => {
                finish_and_restart(ctx)
            }
            (OuterState::ActiveGame(inner), tag) => OuterState::ActiveGame(active_game::on_timer_fired(inner, tag, token, ctx)),
            (other, _) => {
                log::debug!("ignoring stale timer event");
                other
            }
        }
    }

    fn on_engine_move_ready(self, mv: Option<ChessMove>, token: u64, ctx: &mut Ctx) -> OuterState {
        match self {
            OuterState::ActiveGame(inner) => OuterState::ActiveGame(active_game::on_engine_move_ready(inner, mv, token, ctx)),
            other => other,
        }
    }

    /// True once the power-off timer has genuinely fired (used by the
    /// orchestrator to decide whether to stop the event loop after a step).
    pub fn wants_shutdown(&self) -> bool {
        matches!(self, OuterState::WaitingToPowerOff { shutdown_fired: true, .. })
    }
}

fn enter_waiting_to_power_off(cancel_target: Box<OuterState>, ctx: &mut Ctx) -> OuterState {
    let delay = if *ctx.max_pieces_seen <= 4 { ctx.config.power_off_delay_long } else { ctx.config.power_off_delay_short };
    let token = ctx.fresh_token();
    let timer = TimerHandle::schedule(delay, Event::TimerFired { tag: TimerTag::PowerOffShutdown, token }, ctx.events_tx.clone());
    OuterState::WaitingToPowerOff { shutdown_timer: Some(timer), shutdown_token: token, shutdown_fired: false, cancel_target, cancel_timer: None }
}

/// Enters `LedTest`, remembering the caller's state (spec §4.4 `test_leds`).
pub fn enter_led_test(previous: OuterState, ctx: &mut Ctx) -> OuterState {
    let board = ctx.sensor.scan_board();
    ctx.set_leds(LedFrame { constant: board, ..Default::default() });
    let token = ctx.fresh_token();
    let timer = TimerHandle::schedule(ctx.config.led_test_duration, Event::TimerFired { tag: TimerTag::LedTestReturn, token }, ctx.events_tx.clone());
    OuterState::LedTest { timer, token, previous: Box::new(previous) }
}

/// Finalizes the current game and returns to `WaitingForSetup` with a fresh
/// game installed, notifying the orchestrator the game ended.
pub fn finish_and_restart(ctx: &mut Ctx) -> OuterState {
    let ended_game = Box::new(ctx.game.clone());
    ctx.notifications.push(Notification::GameEnded { ended_game });
    *ctx.game = (ctx.new_game)();
    OuterState::WaitingForSetup
}
