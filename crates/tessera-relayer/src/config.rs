//! Relayer configuration, read from `$TESSERA_DATA_DIR/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tessera_coordinator::StageTimeouts;
use tessera_crypto::ed25519::SigningKey;
use zeroize::Zeroizing;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TESSERA_DATA_DIR";

/// Complete relayer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub relayer: RelayerSection,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Chains the relayer can read back. Empty disables on-chain checks.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Concurrent party connections; further connections wait.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerSection {
    /// Hex-encoded ed25519 seed. Relative paths resolve against the data
    /// directory. Generated on first start.
    #[serde(default = "default_signing_key_file")]
    pub signing_key_file: String,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_cosign_secs")]
    pub cosign_secs: u64,
    #[serde(default = "default_deployment_secs")]
    pub deployment_secs: u64,
    #[serde(default = "default_secrets_secs")]
    pub secrets_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// In-process escrow ledger.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: String,
    pub kind: ChainKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = `$TESSERA_DATA_DIR` or `~/.tessera`.
    #[serde(default)]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub file: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_max_connections() -> usize {
    256
}

fn default_signing_key_file() -> String {
    "relayer.key".to_string()
}

fn default_event_buffer() -> usize {
    1024
}

fn default_cosign_secs() -> u64 {
    StageTimeouts::default().cosign_secs
}

fn default_deployment_secs() -> u64 {
    StageTimeouts::default().deployment_secs
}

fn default_secrets_secs() -> u64 {
    StageTimeouts::default().secrets_secs
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "tessera=info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RelayerSection {
    fn default() -> Self {
        Self {
            signing_key_file: default_signing_key_file(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cosign_secs: default_cosign_secs(),
            deployment_secs: default_deployment_secs(),
            secrets_secs: default_secrets_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            cosign_secs: self.cosign_secs,
            deployment_secs: self.deployment_secs,
            secrets_secs: self.secrets_secs,
        }
    }
}

impl RelayerConfig {
    /// Load the config file, falling back to defaults if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&default_data_dir().join("config.toml"))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn signing_key_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.relayer.signing_key_file);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".tessera"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/tessera"))
}

/// Read the relayer's grant signing key, generating and storing a fresh one
/// if the file does not exist yet.
pub fn load_or_create_signing_key(path: &Path) -> anyhow::Result<SigningKey> {
    if path.exists() {
        let encoded = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        );
        let mut seed = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(encoded.trim(), seed.as_mut_slice())
            .with_context(|| format!("{} is not a 32-byte hex seed", path.display()))?;
        return Ok(SigningKey::from_bytes(&seed));
    }

    let key = SigningKey::generate();
    let encoded = Zeroizing::new(hex::encode(key.to_bytes()));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_private(path, encoded.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(key)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
