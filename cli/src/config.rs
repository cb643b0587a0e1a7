// Configuration management for the skylink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/skylink/config.json
// - Linux: ~/.config/skylink/config.json
// - Windows: %APPDATA%\skylink\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use skylink_core::radio::PacketKey;
use skylink_core::{
    AuthPolicy, BootCountPolicy, LinkConfig, StationConfig, TransferConfig, DEFAULT_BOOT_COUNT,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP address of the serial bridge (e.g. a ser2net port)
    pub link_address: String,

    /// Directory the payload server is sandboxed to
    pub payload_root: Option<String>,

    /// HMAC pre-shared key, hex encoded
    pub psk: String,

    /// Anti-replay state file (defaults to the data directory)
    pub state_path: Option<String>,

    /// Boot count assumed before the first beacon arrives
    pub initial_boot_count: u32,

    /// What a beacon with a lower reboot counter does
    pub boot_policy: BootCountPolicy,

    pub link: LinkConfig,
    pub transfer: TransferConfig,
    pub station: StationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_address: "127.0.0.1:7000".to_string(),
            payload_root: None,
            psk: PacketKey::default().to_hex(),
            state_path: None,
            initial_boot_count: DEFAULT_BOOT_COUNT,
            boot_policy: BootCountPolicy::default(),
            link: LinkConfig::default(),
            transfer: TransferConfig::default(),
            station: StationConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("skylink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("skylink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it on first run
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn key(&self) -> Result<PacketKey> {
        PacketKey::from_hex(&self.psk).context("Configured psk is not valid hex")
    }

    pub fn state_file(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("state.json")),
        }
    }

    /// Set a config value (in memory; call `save` to persist)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "link_address" => self.link_address = value.to_string(),
            "payload_root" => self.payload_root = optional(value),
            "psk" => {
                PacketKey::from_hex(value).context("Invalid hex key")?;
                self.psk = value.to_lowercase();
            }
            "state_path" => self.state_path = optional(value),
            "initial_boot_count" => {
                self.initial_boot_count = value.parse().context("Invalid number")?;
            }
            "boot_policy" => self.boot_policy = parse_policy(value)?,
            "auth" => self.station.auth = parse_policy::<AuthPolicy>(value)?,
            "chunk_size" => {
                let chunk_size: usize = value.parse().context("Invalid number")?;
                if chunk_size == 0 || chunk_size > self.link.max_packet_size {
                    anyhow::bail!(
                        "chunk_size must be between 1 and {}",
                        self.link.max_packet_size
                    );
                }
                self.transfer.chunk_size = chunk_size;
            }
            "group_size" => {
                self.transfer.group_size = value.parse().context("Invalid number")?;
            }
            "max_resend_cycles" => {
                self.transfer.max_resend_cycles = value.parse().context("Invalid number")?;
            }
            "ack_timeout_ms" => {
                self.link.ack_timeout =
                    Duration::from_millis(value.parse().context("Invalid number")?);
            }
            "sync_timeout_ms" => {
                self.link.sync_timeout =
                    Duration::from_millis(value.parse().context("Invalid number")?);
            }
            "poll_timeout_ms" => {
                self.station.poll_timeout =
                    Duration::from_millis(value.parse().context("Invalid number")?);
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "link_address" => Some(self.link_address.clone()),
            "payload_root" => self.payload_root.clone(),
            "psk" => Some(self.psk.clone()),
            "state_path" => self.state_path.clone(),
            "initial_boot_count" => Some(self.initial_boot_count.to_string()),
            "boot_policy" => Some(policy_name(&self.boot_policy)),
            "auth" => Some(policy_name(&self.station.auth)),
            "chunk_size" => Some(self.transfer.chunk_size.to_string()),
            "group_size" => Some(self.transfer.group_size.to_string()),
            "max_resend_cycles" => Some(self.transfer.max_resend_cycles.to_string()),
            "ack_timeout_ms" => Some(self.link.ack_timeout.as_millis().to_string()),
            "sync_timeout_ms" => Some(self.link.sync_timeout.as_millis().to_string()),
            "poll_timeout_ms" => Some(self.station.poll_timeout.as_millis().to_string()),
            _ => None,
        }
    }

    /// List all config values; the key itself is never echoed
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("link_address".to_string(), self.link_address.clone()),
            (
                "payload_root".to_string(),
                self.payload_root.clone().unwrap_or_else(|| "(cwd)".to_string()),
            ),
            ("psk".to_string(), format!("({} bytes)", self.psk.len() / 2)),
            (
                "state_path".to_string(),
                self.state_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("initial_boot_count".to_string(), self.initial_boot_count.to_string()),
            ("boot_policy".to_string(), policy_name(&self.boot_policy)),
            ("auth".to_string(), policy_name(&self.station.auth)),
            ("chunk_size".to_string(), self.transfer.chunk_size.to_string()),
            ("group_size".to_string(), self.transfer.group_size.to_string()),
            ("max_resend_cycles".to_string(), self.transfer.max_resend_cycles.to_string()),
            ("ack_timeout_ms".to_string(), format!("{}ms", self.link.ack_timeout.as_millis())),
            ("sync_timeout_ms".to_string(), format!("{}ms", self.link.sync_timeout.as_millis())),
            ("poll_timeout_ms".to_string(), format!("{}ms", self.station.poll_timeout.as_millis())),
        ]
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Policies are stored by their snake_case serde names
fn parse_policy<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Invalid policy: {}", value))
}

fn policy_name<T: Serialize>(policy: &T) -> String {
    match serde_json::to_value(policy) {
        Ok(serde_json::Value::String(name)) => name,
        _ => "(unknown)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.initial_boot_count, 474);
        assert_eq!(config.key().unwrap().as_bytes(), skylink_core::radio::DEFAULT_PSK);
        assert_eq!(config.station.auth, AuthPolicy::Enforce);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.psk, deserialized.psk);
        assert_eq!(config.link, deserialized.link);
        assert_eq!(config.transfer, deserialized.transfer);
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("auth", "warn_only").unwrap();
        config.set("boot_policy", "reject_lower").unwrap();
        config.set("chunk_size", "512").unwrap();
        config.set("ack_timeout_ms", "250").unwrap();

        assert_eq!(config.get("auth").unwrap(), "warn_only");
        assert_eq!(config.get("boot_policy").unwrap(), "reject_lower");
        assert_eq!(config.transfer.chunk_size, 512);
        assert_eq!(config.link.ack_timeout, Duration::from_millis(250));

        assert!(config.set("auth", "sometimes").is_err());
        assert!(config.set("chunk_size", "0").is_err());
        assert!(config.set("psk", "not hex").is_err());
        assert!(config.set("nope", "1").is_err());
        assert!(config.get("nope").is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.set("link_address", "10.0.0.2:7001").unwrap();
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().link_address, "10.0.0.2:7001");
    }

    #[test]
    fn test_list_hides_key() {
        let listed = Config::default().list();
        let (_, psk) = listed.iter().find(|(key, _)| key == "psk").unwrap();
        assert_eq!(psk, "(32 bytes)");
    }
}
