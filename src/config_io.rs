//! JSON load/save for engine tuning configuration.
//!
//! All knobs are performance parameters; a missing file or field falls
//! back to defaults, while a malformed file is a configuration error.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::annealer::AnnealerConfig;
use crate::brute_force::SearchConfig;
use crate::device::DeviceConfig;
use crate::errors::{Result, SolverError};

/// Combined tuning configuration for the device and both engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub annealer: AnnealerConfig,
}

/// Load configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        SolverError::Config(format!(
            "failed to read config {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        SolverError::Config(format!(
            "failed to parse config {}: {}",
            path.as_ref().display(),
            e
        ))
    })
}

/// Save configuration to a JSON file (pretty-printed).
pub fn save_config<P: AsRef<Path>>(path: P, config: &EngineConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config)
        .map_err(|e| SolverError::Config(format!("failed to serialize config: {}", e)))?;
    std::fs::write(path.as_ref(), text).map_err(|e| {
        SolverError::Config(format!(
            "failed to write config {}: {}",
            path.as_ref().display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir().join("spinforge-config-test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("engine.json");

        let mut config = EngineConfig::default();
        config.search.tile_size0 = 256;
        config.search.max_ties = 32;
        config.annealer.random.max_runs_per_fill = 4;
        save_config(&path, &config).expect("save");

        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded.search.tile_size0, 256);
        assert_eq!(loaded.search.max_ties, 32);
        assert_eq!(loaded.annealer.random.max_runs_per_fill, 4);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: EngineConfig =
            serde_json::from_str(r#"{"search": {"tile_size0": 16}}"#).expect("parse");
        assert_eq!(parsed.search.tile_size0, 16);
        assert_eq!(parsed.search.tile_size1, 1024);
        assert_eq!(parsed.annealer.random.max_runs_per_fill, 10);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_config("/nonexistent/spinforge.json").unwrap_err();
        assert!(matches!(err, SolverError::Config(_)));
    }
}
