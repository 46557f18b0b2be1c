//! Demo binary: wires a [`VirtualBoardSensor`] (a text-console stand-in for
//! the reed/LED matrix) and a [`FirstLegalMoveEngine`] into an
//! [`Orchestrator`], and listens for remote-peer TCP connections.

use chessboard_core::config::Config;
use chessboard_core::engine_adapter::{ChessEngine, FirstLegalMoveEngine};
use chessboard_core::orchestrator::Orchestrator;
use chessboard_core::remote_peer::{reader, writer};
use chessboard_core::sensor::{BoardSensorSource, VirtualBoardSensor};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    let sensor: Arc<Mutex<dyn BoardSensorSource>> = Arc::new(Mutex::new(VirtualBoardSensor::new(
        chessboard_core::occupancy::Occupancy::EMPTY,
    )));
    let engine: Arc<Mutex<dyn ChessEngine>> = Arc::new(Mutex::new(FirstLegalMoveEngine));

    let mut orchestrator = Orchestrator::new(config.clone(), Arc::clone(&sensor), Arc::clone(&engine));
    let events_tx = orchestrator.events_sender();

    spawn_sensor_thread(Arc::clone(&sensor), events_tx.clone());

    let (remote_requests_tx, remote_requests_rx) = mpsc::unbounded_channel();
    spawn_remote_peer_listener(config.remote_peer_listen_addr.clone(), remote_requests_tx);

    log::info!("chessboard core starting, remote peer link on {}", config.remote_peer_listen_addr);
    orchestrator.run(remote_requests_rx).await;
    log::info!("event loop stopped, shutting down");
}

/// Runs the board-scanning loop on its own OS thread (spec §5: the reed
/// matrix scan is not async-friendly), locking the sensor only for the
/// instant of each `scan_board` call.
fn spawn_sensor_thread(sensor: Arc<Mutex<dyn BoardSensorSource>>, events_tx: mpsc::UnboundedSender<chessboard_core::state_machine::Event>) {
    std::thread::spawn(move || {
        let mut last = chessboard_core::occupancy::Occupancy::EMPTY;
        loop {
            let current = {
                let mut guard = sensor.lock().expect("sensor mutex poisoned");
                guard.scan_board()
            };
            if current != last {
                last = current;
                if events_tx.send(chessboard_core::state_machine::Event::BoardChanged(current)).is_err() {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    });
}

/// Accepts remote-peer TCP connections one at a time, spawning a reader and
/// a writer task per connection (spec §6.3).
fn spawn_remote_peer_listener(addr: String, remote_requests_tx: mpsc::UnboundedSender<reader::RemoteRequest>) {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                log::error!("failed to bind remote peer listener on {addr}: {err}");
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    log::info!("remote peer connected from {peer_addr}");
                    let (read_half, write_half) = stream.into_split();
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let requests_tx = remote_requests_tx.clone();
                    let reader_handle = tokio::spawn(reader::run(read_half, requests_tx, outbound_tx.clone()));
                    tokio::spawn(writer::run(write_half, outbound_rx));

                    let _ = remote_requests_tx.send(reader::RemoteRequest::Connected { outbound_tx });
                    let disconnect_tx = remote_requests_tx.clone();
                    tokio::spawn(async move {
                        let _ = reader_handle.await;
                        let _ = disconnect_tx.send(reader::RemoteRequest::Disconnected);
                    });
                }
                Err(err) => {
                    log::warn!("failed to accept remote peer connection: {err}");
                }
            }
        }
    });
}
