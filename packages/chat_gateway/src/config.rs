//! Configuration
//!
//! Layered: built-in defaults, then `config.toml` in the config dir,
//! then environment variables prefixed `CHATGATE_` (with `__` as the
//! section separator, e.g. `CHATGATE_SERVER__PORT=9000`).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::ws::protocol::UserId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerFileConfig,
    pub auth: AuthFileConfig,
    pub liveness: LivenessFileConfig,
    pub relay: RelayFileConfig,
    pub chat: ChatFileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Shared HS256 secret. When unset, a per-install secret is
    /// generated into `<config_dir>/jwt_secret` (dev mode only; in a
    /// multi-process deployment all processes must share one secret).
    pub jwt_secret: Option<String>,
    /// Seconds an unauthenticated connection may stay open.
    pub handshake_timeout_secs: u64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            handshake_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessFileConfig {
    pub reader_idle_secs: u64,
    pub writer_idle_secs: u64,
    pub all_idle_secs: u64,
    pub probe_grace_secs: u64,
}

impl Default for LivenessFileConfig {
    fn default() -> Self {
        Self {
            reader_idle_secs: 300,
            writer_idle_secs: 240,
            all_idle_secs: 60,
            probe_grace_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// In-process loopback. Single-node deployments and tests.
    Local,
    /// Redis pub/sub on `channel`.
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayFileConfig {
    pub mode: RelayMode,
    pub redis_url: String,
    pub channel: String,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Local,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "chatgate:relay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFileConfig {
    /// Whether a GROUP message echoes to the sender's other devices.
    /// The originating connection never receives an echo.
    pub group_echo_to_sender_devices: bool,
    /// Static group rosters, keyed by group id. A stand-in for the
    /// platform's membership service in single-node setups.
    pub groups: HashMap<String, Vec<UserId>>,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            group_echo_to_sender_devices: false,
            groups: HashMap::new(),
        }
    }
}

impl FileConfig {
    /// Loads layered config rooted at `config_dir`.
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let config_path = config_dir.join("config.toml");
        Figment::from(Serialized::defaults(FileConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATGATE_").split("__"))
            .extract()
            .with_context(|| format!("loading config from {}", config_path.display()))
    }
}

/// Runtime liveness thresholds, converted once from the file form.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub reader_idle: Duration,
    pub writer_idle: Duration,
    pub all_idle: Duration,
    pub probe_grace: Duration,
}

impl From<&LivenessFileConfig> for LivenessConfig {
    fn from(file: &LivenessFileConfig) -> Self {
        Self {
            reader_idle: Duration::from_secs(file.reader_idle_secs),
            writer_idle: Duration::from_secs(file.writer_idle_secs),
            all_idle: Duration::from_secs(file.all_idle_secs),
            probe_grace: Duration::from_secs(file.probe_grace_secs),
        }
    }
}

/// Routing policy knobs.
#[derive(Debug, Clone)]
pub struct ChatPolicy {
    pub group_echo_to_sender_devices: bool,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub handshake_timeout: Duration,
    pub liveness: LivenessConfig,
    pub relay: RelayFileConfig,
    pub chat_policy: ChatPolicy,
    /// Parsed form of `[chat] groups`.
    pub groups: HashMap<i64, HashSet<UserId>>,
}

impl GatewayConfig {
    pub fn from_file(file: &FileConfig) -> anyhow::Result<Self> {
        let mut groups = HashMap::new();
        for (key, members) in &file.chat.groups {
            let group_id: i64 = key
                .parse()
                .with_context(|| format!("non-numeric group id in [chat.groups]: {key}"))?;
            groups.insert(group_id, members.iter().copied().collect());
        }

        Ok(Self {
            host: file.server.host.clone(),
            port: file.server.port,
            handshake_timeout: Duration::from_secs(file.auth.handshake_timeout_secs),
            liveness: LivenessConfig::from(&file.liveness),
            relay: file.relay.clone(),
            chat_policy: ChatPolicy {
                group_echo_to_sender_devices: file.chat.group_echo_to_sender_devices,
            },
            groups,
        })
    }
}

/// Returns the HS256 secret: from config if set, otherwise from (or
/// newly written to) `<config_dir>/jwt_secret`.
pub fn load_or_generate_secret(
    config: &AuthFileConfig,
    config_dir: &Path,
) -> anyhow::Result<Vec<u8>> {
    if let Some(secret) = &config.jwt_secret {
        return Ok(secret.as_bytes().to_vec());
    }

    let secret_path = config_dir.join("jwt_secret");
    if secret_path.exists() {
        let hex = std::fs::read_to_string(&secret_path)
            .with_context(|| format!("reading {}", secret_path.display()))?;
        return Ok(hex.trim().as_bytes().to_vec());
    }

    let bytes: [u8; 32] = rand::random();
    let mut hex = String::with_capacity(64);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    std::fs::create_dir_all(config_dir)?;
    std::fs::write(&secret_path, &hex)
        .with_context(|| format!("writing {}", secret_path.display()))?;
    tracing::info!(path = %secret_path.display(), "generated new jwt secret");
    Ok(hex.into_bytes())
}
