//! The engine adapter (spec §4.2): queries a `ChessEngine` asynchronously,
//! consulting an opening book with a skill-proportional probability before
//! falling back to a timed search.

use crate::rules::{ChessMove, Position};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Skill above this value no longer maps to a fixed strength level; engine
/// play above it is full-strength with a longer search instead.
pub const MAX_NORMAL_SKILL: u8 = 8;

/// Strength levels `skill` 1..=8 map onto, index `skill - 1`.
const STRENGTH_LEVELS: [u8; MAX_NORMAL_SKILL as usize] = [1, 4, 7, 10, 13, 16, 18, 20];

const MAX_STRENGTH: u8 = 20;
const BOOK_YIELD_DELAY: Duration = Duration::from_millis(200);

/// A swappable chess engine collaborator. A real implementation talks UCI
/// to a subprocess; tests and the demo binary use an in-process stub.
pub trait ChessEngine: Send {
    /// Looks up a book move for `position`, or `None` on a miss.
    fn probe_opening_book(&mut self, position: &Position) -> Option<ChessMove>;

    /// Blocking timed search at the given strength level (1..=20).
    fn search(&mut self, position: &Position, strength: u8, think_time: Duration) -> Option<ChessMove>;
}

fn strength_for_skill(skill: u8) -> u8 {
    if skill == 0 {
        STRENGTH_LEVELS[0]
    } else if skill <= MAX_NORMAL_SKILL {
        STRENGTH_LEVELS[(skill - 1) as usize]
    } else {
        MAX_STRENGTH
    }
}

fn think_time_for_skill(skill: u8) -> Duration {
    if skill <= MAX_NORMAL_SKILL {
        Duration::from_secs(1)
    } else {
        Duration::from_secs((skill - 7) as u64)
    }
}

/// Queries the engine for its move in `position` at the given skill level.
/// Suspends the caller (an `await` point on the event loop per §5): either
/// for the opening-book "thinking" delay, or for the blocking search itself
/// (run off the event loop via `spawn_blocking`).
pub async fn query_move(
    engine: Arc<Mutex<dyn ChessEngine>>,
    position: Position,
    skill: u8,
) -> Option<ChessMove> {
    let book_probability = skill as f64 / MAX_NORMAL_SKILL as f64;
    let roll: f64 = rand::random();
    if roll < book_probability {
        let book_move = {
            let mut guard = engine.lock().expect("engine mutex poisoned");
            guard.probe_opening_book(&position)
        };
        if let Some(mv) = book_move {
            tokio::time::sleep(BOOK_YIELD_DELAY).await;
            return Some(mv);
        }
    }

    let strength = strength_for_skill(skill);
    let think_time = think_time_for_skill(skill);
    let search_result = tokio::task::spawn_blocking(move || {
        let mut guard = engine.lock().expect("engine mutex poisoned");
        guard.search(&position, strength, think_time)
    })
    .await;
    search_result.unwrap_or(None)
}

/// An in-process stand-in engine for the demo binary and tests: picks the
/// first legal move, never hits the opening book. Good enough to exercise
/// the state machine's `CalculateEngineMove` path without a real UCI
/// subprocess.
pub struct FirstLegalMoveEngine;

impl ChessEngine for FirstLegalMoveEngine {
    fn probe_opening_book(&mut self, _position: &Position) -> Option<ChessMove> {
        None
    }

    fn search(&mut self, position: &Position, _strength: u8, _think_time: Duration) -> Option<ChessMove> {
        position.legal_moves().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_mapping_matches_table() {
        assert_eq!(strength_for_skill(1), 1);
        assert_eq!(strength_for_skill(8), 20);
        assert_eq!(strength_for_skill(20), MAX_STRENGTH);
    }

    #[test]
    fn think_time_matches_spec_formula() {
        assert_eq!(think_time_for_skill(5), Duration::from_secs(1));
        assert_eq!(think_time_for_skill(10), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn query_move_returns_a_legal_move() {
        let engine: Arc<Mutex<dyn ChessEngine>> = Arc::new(Mutex::new(FirstLegalMoveEngine));
        let position = Position::starting();
        let mv = query_move(engine, position.clone(), 1).await;
        assert!(mv.is_some());
        assert!(position.legal_moves().contains(&mv.unwrap()));
    }
}
