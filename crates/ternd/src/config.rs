//! TOML configuration for the tern daemon.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Labeler identity and key material.
    pub labeler: LabelerSection,
    /// Log storage locations.
    pub storage: StorageSection,
    /// Listen addresses.
    pub server: ServerSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[labeler]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LabelerSection {
    /// The issuer DID labels are published under.
    pub did: String,
    /// Hex-encoded secp256k1 private key used to sign emitted labels.
    pub private_key: String,
    /// Optional allow-list of label values. When set, new positive labels
    /// must use one of these values; negations are always accepted.
    pub allowed_values: Option<Vec<String>>,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory for the label log database.
    pub path: PathBuf,
    /// Optional directory of a legacy label database. When present on
    /// disk and ahead of the primary store, its entries are imported
    /// before the service starts.
    pub legacy_path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        let path = dirs::home_dir()
            .map(|h| h.join(".tern"))
            .unwrap_or_else(|| PathBuf::from(".tern"));
        Self {
            path,
            legacy_path: None,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address for the public XRPC API.
    pub listen_addr: String,
    /// Address for the admin API (label ingress + metrics). Disabled
    /// when unset; never expose this one publicly.
    pub admin_listen_addr: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8081".to_string(),
            admin_listen_addr: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
