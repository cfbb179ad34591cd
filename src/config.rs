use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::liveness::RetryPolicy;

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/vervids/`
/// - Linux: `~/.config/vervids/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/vervids/`
///
/// Falls back to `~/.vervids/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("vervids"))
        .unwrap_or_else(dotdir)
}

/// Fallback config directory: ~/.vervids/
fn dotdir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vervids")
}

/// Load a JSON config file from the config dir, returning Default if missing or corrupt.
pub fn load_json_config<T: DeserializeOwned + Default>(filename: &str) -> T {
    load_json_file(&config_dir().join(filename))
}

/// Load a JSON file, returning Default if missing or corrupt.
/// Logs warnings when the file exists but cannot be read or parsed,
/// so corrupt files are visible in logs instead of silently resetting state.
pub fn load_json_file<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Could not read config {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Corrupt config {}: {e}. Using defaults.", path.display());
            T::default()
        }
    }
}

/// Save a JSON file into the config dir atomically.
pub fn save_json_config<T: Serialize>(filename: &str, value: &T) -> Result<(), String> {
    save_json_file(&config_dir().join(filename), value)
}

/// Save a JSON file atomically (temp file + rename).
/// Sets 0600 permissions on Unix; history can contain project paths.
pub fn save_json_file<T: Serialize>(target: &Path, value: &T) -> Result<(), String> {
    let dir = target
        .parent()
        .ok_or_else(|| format!("Invalid config path: {}", target.display()))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;

    let filename = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.json".to_string());
    let temp = dir.join(format!("{}.tmp.{}", filename, std::process::id()));

    std::fs::write(&temp, &json).map_err(|e| format!("Failed to write temp config: {e}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&temp, perms)
            .map_err(|e| format!("Failed to set config permissions: {e}"))?;
    }

    // Atomic rename: either the old file or new file exists, never partial
    std::fs::rename(&temp, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit config: {e}")
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Settings for the `vervids-relay` HTTP server, stored in `relay.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Interface to bind. Localhost only unless explicitly widened.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Literal prefix every command must start with (after trimming)
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Command started detached and tracked by a single handle
    #[serde(default = "default_background_command")]
    pub background_command: String,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    /// Per-stream capture cap for foreground commands
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

pub const RELAY_CONFIG_FILE: &str = "relay.json";

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    3002
}

fn default_command_prefix() -> String {
    "vervids".to_string()
}

fn default_background_command() -> String {
    "vervids serve".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    300
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_relay_port(),
            command_prefix: default_command_prefix(),
            background_command: default_background_command(),
            exec_timeout_secs: default_exec_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl RelayConfig {
    pub fn load() -> Self {
        load_json_config(RELAY_CONFIG_FILE)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Panel
// ---------------------------------------------------------------------------

/// Settings for the `vervids-panel` front end, stored in `panel.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Background API started by `vervids serve`
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Where the extension (and the relay binary) is installed
    #[serde(default)]
    pub extension_dir: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Wait after asking the relay to start the background API
    #[serde(default = "default_serve_settle_ms")]
    pub serve_settle_ms: u64,
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
}

pub const PANEL_CONFIG_FILE: &str = "panel.json";

fn default_relay_url() -> String {
    "http://localhost:3002".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_serve_settle_ms() -> u64 {
    3_000
}

fn default_execute_timeout_secs() -> u64 {
    300
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            api_url: default_api_url(),
            extension_dir: None,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            serve_settle_ms: default_serve_settle_ms(),
            execute_timeout_secs: default_execute_timeout_secs(),
        }
    }
}

impl PanelConfig {
    pub fn load() -> Self {
        load_json_config(PANEL_CONFIG_FILE)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn serve_settle(&self) -> Duration {
        Duration::from_millis(self.serve_settle_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}
