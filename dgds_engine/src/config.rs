use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dgds_formats::GameVariant;
use serde::{Deserialize, Serialize};

/// Engine time per animation frame-tick.
pub const MS_PER_FRAME: u32 = 60;

/// Interpreter settings that vary per title or per host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub variant: GameVariant,
    /// Nesting limit for TTM GOSUB.
    pub max_gosub_depth: usize,
    /// Seed for the headless random source.
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            variant: GameVariant::Dragon,
            max_gosub_depth: 8,
            rng_seed: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse engine config json: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "variant": "heart-of-china" }"#).unwrap();
        assert_eq!(config.variant, GameVariant::HeartOfChina);
        assert_eq!(config.max_gosub_depth, 8);
        assert_eq!(config.rng_seed, 0);
    }
}
