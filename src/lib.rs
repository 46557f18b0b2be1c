//! # chessboard-core
//!
//! The board-interaction state machine firmware core for an electronic
//! chessboard: a layered finite-state machine that watches a reed-switch
//! board sensor, drives an LED matrix, arbitrates a local chess game against
//! a human, an engine, or a remote Bluetooth-linked peer, and persists
//! finished games as PGN.
//!
//! The crate is organized around a single-threaded cooperative event loop
//! (the [`orchestrator`]) that owns the authoritative [`game::Game`] and the
//! [`state_machine`]'s current state; everything else (the board sensor, the
//! engine, the remote-peer link, persistence) is an external collaborator it
//! drives through a narrow trait or channel.

pub mod config;
pub mod engine_adapter;
pub mod error;
pub mod game;
pub mod occupancy;
pub mod orchestrator;
pub mod remote_peer;
pub mod rules;
pub mod sensor;
pub mod state_machine;
pub mod storage;
