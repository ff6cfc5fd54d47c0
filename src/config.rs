use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::network::Network;

pub const DEFAULT_HIDDEN_SIZE: usize = 200;
pub const DEFAULT_EPOCHS: usize = 5;

/// Tunable settings. Every field may be omitted from a config file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub learning_rate: Option<f64>,
    pub hidden_size: Option<usize>,
    pub epochs: Option<usize>,
    pub seed: Option<u64>,
}

impl Settings {
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Json { path: path.display().to_string(), source })
    }

    // merge settings where the second overwrites the first
    pub fn merge(self, other: Self) -> Self {
        Self {
            learning_rate: other.learning_rate.or(self.learning_rate),
            hidden_size: other.hidden_size.or(self.hidden_size),
            epochs: other.epochs.or(self.epochs),
            seed: other.seed.or(self.seed),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate.unwrap_or(Network::DEFAULT_LEARNING_RATE)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size.unwrap_or(DEFAULT_HIDDEN_SIZE)
    }

    pub fn epochs(&self) -> usize {
        self.epochs.unwrap_or(DEFAULT_EPOCHS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::default();
        assert_eq!(settings.learning_rate(), 0.1);
        assert_eq!(settings.hidden_size(), DEFAULT_HIDDEN_SIZE);
        assert_eq!(settings.epochs(), DEFAULT_EPOCHS);
    }

    #[test]
    fn later_settings_win() {
        let file = Settings { learning_rate: Some(0.3), hidden_size: Some(64), ..Default::default() };
        let cli = Settings { learning_rate: Some(0.05), epochs: Some(2), ..Default::default() };
        let merged = file.merge(cli);
        assert_eq!(merged.learning_rate(), 0.05);
        assert_eq!(merged.hidden_size(), 64);
        assert_eq!(merged.epochs(), 2);
        assert_eq!(merged.seed, None);
    }

    #[test]
    fn reads_partial_json() {
        let path = std::env::temp_dir().join(format!("digit-network-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "hidden_size": 100, "seed": 9 }"#).unwrap();
        let settings = Settings::load_json(&path).unwrap();
        assert_eq!(settings, Settings { hidden_size: Some(100), seed: Some(9), ..Default::default() });

        fs::write(&path, r#"{ "hiden_size": 100 }"#).unwrap();
        assert!(matches!(Settings::load_json(&path), Err(ConfigError::Json { .. })));
        fs::remove_file(&path).unwrap();
    }
}
