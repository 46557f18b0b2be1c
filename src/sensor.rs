//! The Board Sensor Source (spec §6.1): the reed-matrix/LED-matrix
//! collaborator the state machine drives but does not implement.

use crate::occupancy::Occupancy;
use colored::Colorize;
use std::sync::{Arc, Mutex};

/// LED layering: fast-blink wins over slow-blink, which wins over constant
/// (spec §6.1). Carried as plain fields rather than a method call per LED
/// primitive, matching `set_leds`'s single-call contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedFrame {
    pub constant: Occupancy,
    pub slow_primary: Occupancy,
    pub slow_secondary: Occupancy,
    pub fast_primary: Occupancy,
    pub fast_secondary: Occupancy,
}

/// External collaborator that scans the reed-switch matrix and drives the
/// LED matrix. Implementations are expected to block in `scan_board`; the
/// dedicated sensor thread in `Orchestrator` is what keeps that off the
/// event loop.
pub trait BoardSensorSource: Send {
    fn scan_board(&mut self) -> Occupancy;

    fn set_leds(&mut self, frame: LedFrame);

    /// Zeroes the blink phase so a newly displayed pattern starts visibly
    /// rather than mid-cycle.
    fn reset_blink_timer(&mut self);

    /// Blocks until the board differs from its last scan. The default
    /// implementation polls `scan_board` in a tight loop; real drivers
    /// typically wait on an interrupt instead.
    fn await_board_change(&mut self, previous: Occupancy) -> Occupancy {
        loop {
            let current = self.scan_board();
            if current != previous {
                return current;
            }
        }
    }
}

/// A text-console stand-in for the physical board, used by the demo binary
/// and integration tests. Holds its occupancy behind a mutex so a test
/// harness can mutate it from outside the event loop, and prints LED frames
/// to the terminal using the same piece-rendering palette as the rest of
/// this crate's demo tooling.
pub struct VirtualBoardSensor {
    occupancy: Arc<Mutex<Occupancy>>,
    last_frame: LedFrame,
}

impl VirtualBoardSensor {
    pub fn new(initial: Occupancy) -> Self {
        Self { occupancy: Arc::new(Mutex::new(initial)), last_frame: LedFrame::default() }
    }

    /// A handle a test or demo driver can use to push board changes without
    /// going through physical hardware.
    pub fn handle(&self) -> VirtualBoardHandle {
        VirtualBoardHandle { occupancy: Arc::clone(&self.occupancy) }
    }

    /// The most recent LED frame passed to `set_leds`, for assertions in
    /// tests that drive this sensor directly.
    pub fn last_frame(&self) -> LedFrame {
        self.last_frame
    }

    fn render(&self) {
        println!("  +---+---+---+---+---+---+---+---+");
        let board = *self.occupancy.lock().expect("virtual board mutex poisoned");
        for rank in (0..8u8).rev() {
            print!("{} ", rank + 1);
            for file in 0..8u8 {
                let idx = rank * 8 + file;
                let cell = if self.last_frame.fast_primary.contains(idx) {
                    "F1".red().bold().to_string()
                } else if self.last_frame.fast_secondary.contains(idx) {
                    "F2".red().to_string()
                } else if self.last_frame.slow_primary.contains(idx) {
                    "S1".yellow().bold().to_string()
                } else if self.last_frame.slow_secondary.contains(idx) {
                    "S2".yellow().to_string()
                } else if self.last_frame.constant.contains(idx) {
                    "C ".green().bold().to_string()
                } else if board.contains(idx) {
                    "##".white().to_string()
                } else {
                    "..".dimmed().to_string()
                };
                print!("|{cell}");
            }
            println!("|");
        }
        println!("  +---+---+---+---+---+---+---+---+");
        println!("    a  b  c  d  e  f  g  h");
    }
}

impl BoardSensorSource for VirtualBoardSensor {
    fn scan_board(&mut self) -> Occupancy {
        *self.occupancy.lock().expect("virtual board mutex poisoned")
    }

    fn set_leds(&mut self, frame: LedFrame) {
        self.last_frame = frame;
        self.render();
    }

    fn reset_blink_timer(&mut self) {}
}

/// A cloneable handle for pushing occupancy changes into a
/// [`VirtualBoardSensor`] from outside the event loop (demo harness, test
/// driver).
#[derive(Clone)]
pub struct VirtualBoardHandle {
    occupancy: Arc<Mutex<Occupancy>>,
}

impl VirtualBoardHandle {
    pub fn set(&self, board: Occupancy) {
        *self.occupancy.lock().expect("virtual board mutex poisoned") = board;
    }

    pub fn get(&self) -> Occupancy {
        *self.occupancy.lock().expect("virtual board mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_mutation_is_visible_to_scan_board() {
        let mut sensor = VirtualBoardSensor::new(Occupancy::EMPTY);
        let handle = sensor.handle();
        handle.set(Occupancy::STARTING_SQUARES);
        assert_eq!(sensor.scan_board(), Occupancy::STARTING_SQUARES);
    }
}
