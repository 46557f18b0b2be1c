//! Persistence (spec §6.4): settings and engine-settings JSON files, and the
//! plain-text PGN archive directory. Adapted from the settings/archive half
//! of the teacher's storage module; the teacher's compact binary game
//! format and zstd compression are not carried forward — the wire spec
//! calls for plain PGN text, matching what the original Python
//! `FileManager` wrote.

use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The single recognized settings key (spec §3, §4.4 `update_settings`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "learningMode")]
    pub learning_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { learning_mode: false }
    }
}

pub const LEGAL_SETTING_KEYS: &[&str] = &["learningMode"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineColor {
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(rename = "enableEngine")]
    pub enable_engine: bool,
    #[serde(rename = "engineColor")]
    pub engine_color: EngineColor,
    #[serde(rename = "engineLevel")]
    pub engine_level: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { enable_engine: false, engine_color: EngineColor::Black, engine_level: 10 }
    }
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, PersistenceError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str(&contents).map_err(|e| PersistenceError::Serde(path.display().to_string(), e))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(PersistenceError::Io(e)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents =
        serde_json::to_string_pretty(value).map_err(|e| PersistenceError::Serde(path.display().to_string(), e))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn read_settings(path: &Path) -> Result<Settings, PersistenceError> {
    read_json(path)
}

pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), PersistenceError> {
    write_json(path, settings)
}

pub fn read_engine_settings(path: &Path) -> Result<EngineSettings, PersistenceError> {
    read_json(path)
}

pub fn write_engine_settings(path: &Path, settings: &EngineSettings) -> Result<(), PersistenceError> {
    write_json(path, settings)
}

pub fn format_pgn_file_name(game_id: &str) -> String {
    format!("game_{game_id}.pgn")
}

/// Matches `^game_[A-Za-z0-9]+\.pgn$` (spec §6.4) without pulling in a regex
/// dependency for a single fixed pattern.
pub fn is_valid_pgn_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_prefix("game_").and_then(|rest| rest.strip_suffix(".pgn")) else {
        return false;
    };
    !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Writes `pgn` to `game_<id>.pgn` in `active_dir`.
pub fn write_pgn(active_dir: &Path, game_id: &str, pgn: &str) -> Result<PathBuf, PersistenceError> {
    std::fs::create_dir_all(active_dir)?;
    let path = active_dir.join(format_pgn_file_name(game_id));
    std::fs::write(&path, pgn)?;
    Ok(path)
}

pub fn read_pgn(active_dir: &Path, file_name: &str) -> Result<String, PersistenceError> {
    if !is_valid_pgn_file_name(file_name) {
        return Err(PersistenceError::NotFound(file_name.to_string()));
    }
    let path = active_dir.join(file_name);
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PersistenceError::NotFound(path.display().to_string())
        } else {
            PersistenceError::Io(e)
        }
    })
}

/// Moves a PGN file from the active directory into the sibling archive
/// directory.
pub fn archive_file(active_dir: &Path, archive_dir: &Path, file_name: &str) -> Result<(), PersistenceError> {
    if !is_valid_pgn_file_name(file_name) {
        return Err(PersistenceError::NotFound(file_name.to_string()));
    }
    std::fs::create_dir_all(archive_dir)?;
    let from = active_dir.join(file_name);
    let to = archive_dir.join(file_name);
    std::fs::rename(&from, &to).map_err(|source| PersistenceError::Rename {
        from: from.display().to_string(),
        to: to.display().to_string(),
        source,
    })
}

/// Lists the valid `game_*.pgn` files currently in `active_dir`.
pub fn saved_games(active_dir: &Path) -> Result<Vec<String>, PersistenceError> {
    let entries = match std::fs::read_dir(active_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::Io(e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str()
            && is_valid_pgn_file_name(name)
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgn_file_name_validation() {
        assert!(is_valid_pgn_file_name("game_abc123.pgn"));
        assert!(!is_valid_pgn_file_name("game_.pgn"));
        assert!(!is_valid_pgn_file_name("game_abc.pgn.bak"));
        assert!(!is_valid_pgn_file_name("../../etc/passwd"));
    }

    #[test]
    fn settings_round_trip() {
        let dir = std::env::temp_dir().join(format!("chessboard-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        write_settings(&path, &Settings { learning_mode: true }).unwrap();
        let read_back = read_settings(&path).unwrap();
        assert!(read_back.learning_mode);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_settings_file_yields_default() {
        let path = Path::new("/nonexistent/chessboard-core-settings.json");
        let settings = read_settings(path).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
