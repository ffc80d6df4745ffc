//! Configuration management for ConsentChain

use crate::consensus::DEFAULT_THRESHOLD;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsensusConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub peers: Vec<String>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(text).map_err(|e| ChainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.node.node_id.trim().is_empty() {
            return Err(ChainError::Config(
                "node.node_id must be set in the config file".to_string(),
            ));
        }
        if !(self.consensus.threshold > 0.0 && self.consensus.threshold <= 1.0) {
            return Err(ChainError::Config(format!(
                "consensus.threshold must be in (0, 1], got {}",
                self.consensus.threshold
            )));
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = fs::read_to_string(path.as_ref()).unwrap_or_default();
    if text.is_empty() {
        // Sane defaults when the config file is absent
        return Ok(Config {
            node: NodeConfig {
                node_id: "node-0".to_string(),
                data_dir: default_data_dir(),
            },
            consensus: ConsensusConfig::default(),
        });
    }
    Config::from_toml(&text)
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_data_dir() -> String {
    "./data".to_string()
}
