//! Small shared helpers used by the CLI binaries and tests: hex encoding
//! for keys and keyword tokens printed to logs, and config file loading.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SseError};

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| SseError::CorruptData(format!("invalid hex: {e}")))
}

/// Runtime configuration shared by both binaries: storage directory, tree
/// depth, and Tethys/Pluto sizing knobs. Loaded once at startup from a
/// small JSON file so operators don't have to pass every knob on the CLI.
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_tree_depth")]
    pub tree_depth: u8,
    #[serde(default = "default_page_items")]
    pub page_items: u64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_tree_depth() -> u8 {
    crate::diana::TREE_DEPTH
}

fn default_page_items() -> u64 {
    4096
}

fn default_epsilon() -> f64 {
    0.2
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { tree_depth: default_tree_depth(), page_items: default_page_items(), epsilon: default_epsilon() }
    }
}

impl RunnerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(SseError::IoFailure)?;
        serde_json::from_slice(&bytes).map_err(|e| SseError::CorruptData(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn config_defaults_when_file_has_no_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{}").unwrap();
        let cfg = RunnerConfig::load(&path).unwrap();
        assert_eq!(cfg.tree_depth, crate::diana::TREE_DEPTH);
        assert_eq!(cfg.page_items, 4096);
    }
}
