use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
    #[serde(default)]
    pub tabs: TabsConfig,
    #[serde(default)]
    pub badge: BadgeConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Durable intercept toggles.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
}

/// Connection to the desktop app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "default_desktop_url")]
    pub url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Give up on a dial (TCP plus WebSocket upgrade) after this long.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Cap on messages held while disconnected.  Unset means unbounded;
    /// when set, the oldest message is dropped to make room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    #[serde(default = "default_keepalive_period_secs")]
    pub period_secs: u64,
    /// Where the alarm schedule is persisted across restarts.
    #[serde(default = "default_alarm_file")]
    pub alarm_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabsConfig {
    /// How long a programmatic close stays suppressed after the host
    /// confirms it.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeConfig {
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "platform::loopback")]
    pub bind_address: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "platform::loopback")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
        }
    }
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            url: default_desktop_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_pending: None,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            period_secs: default_keepalive_period_secs(),
            alarm_file: default_alarm_file(),
        }
    }
}

impl Default for TabsConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            pulse_interval_ms: default_pulse_interval_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: platform::loopback(),
            port: default_bridge_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: platform::loopback(),
            port: default_http_port(),
        }
    }
}

impl DesktopConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl KeepAliveConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }
}

impl TabsConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl BadgeConfig {
    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms.max(1))
    }
}

fn default_settings_file() -> PathBuf {
    platform::data_dir().join("settings.json")
}

fn default_alarm_file() -> PathBuf {
    platform::data_dir().join("alarms.json")
}

fn default_desktop_url() -> String {
    platform::desktop_url()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_period_secs() -> u64 {
    20
}

fn default_close_grace_ms() -> u64 {
    100
}

fn default_pulse_interval_ms() -> u64 {
    400
}

fn default_bridge_port() -> u16 {
    platform::BRIDGE_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    platform::HTTP_PORT
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
