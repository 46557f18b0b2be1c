//! Process configuration (spec §9 "module-level globals become configuration
//! values passed into the Orchestrator at construction").

use std::path::PathBuf;
use std::time::Duration;

/// Paths, timer durations, and collaborator locations the orchestrator is
/// built with. Distinct from [`crate::storage::Settings`] and engine
/// settings, which are *persisted user preferences* rather than process
/// configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings_path: PathBuf,
    pub engine_settings_path: PathBuf,
    pub pgn_active_dir: PathBuf,
    pub pgn_archive_dir: PathBuf,

    pub power_off_delay_short: Duration,
    pub power_off_delay_long: Duration,
    pub power_off_cancel_delay: Duration,
    pub abort_delay: Duration,
    pub confirm_move_debounce: Duration,
    pub game_end_flash_duration: Duration,
    pub led_test_duration: Duration,

    pub engine_binary_path: Option<PathBuf>,
    pub opening_book_path: Option<PathBuf>,

    pub remote_peer_listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("data/settings.json"),
            engine_settings_path: PathBuf::from("data/engine_settings.json"),
            pgn_active_dir: PathBuf::from("data/pgn"),
            pgn_archive_dir: PathBuf::from("data/pgn/archive"),

            power_off_delay_short: Duration::from_secs(10),
            power_off_delay_long: Duration::from_secs(30),
            power_off_cancel_delay: Duration::from_millis(500),
            abort_delay: Duration::from_millis(2_500),
            confirm_move_debounce: Duration::from_millis(300),
            game_end_flash_duration: Duration::from_secs(4),
            led_test_duration: Duration::from_secs(6),

            engine_binary_path: None,
            opening_book_path: None,

            remote_peer_listen_addr: "0.0.0.0:9696".to_string(),
        }
    }
}

impl Config {
    /// Reads overrides from the environment, falling back to [`Default`]
    /// for anything unset.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(data_dir) = std::env::var("CHESSBOARD_DATA_DIR") {
            let base = PathBuf::from(data_dir);
            config.settings_path = base.join("settings.json");
            config.engine_settings_path = base.join("engine_settings.json");
            config.pgn_active_dir = base.join("pgn");
            config.pgn_archive_dir = base.join("pgn").join("archive");
        }
        if let Ok(engine_path) = std::env::var("CHESSBOARD_ENGINE_PATH") {
            config.engine_binary_path = Some(PathBuf::from(engine_path));
        }
        if let Ok(book_path) = std::env::var("CHESSBOARD_OPENING_BOOK") {
            config.opening_book_path = Some(PathBuf::from(book_path));
        }
        if let Ok(addr) = std::env::var("CHESSBOARD_LISTEN_ADDR") {
            config.remote_peer_listen_addr = addr;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_delays() {
        let config = Config::default();
        assert!(config.power_off_delay_short < config.power_off_delay_long);
        assert_eq!(config.confirm_move_debounce, Duration::from_millis(300));
    }
}
