// Author: Quayside contributors
// License: MIT

use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use rune_cfg::RuneConfig;

/// Top-level daemon configuration. Per spec.md §3/§6 this is the only
/// state the core persists *itself* (everything else lives in the OS
/// services it drives); resolved once at startup and handed to each
/// manager's constructor.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_name: String,
    pub lock_before_suspend: bool,
    pub network_backend_override: Option<NetworkBackendOverride>,
    pub colour: ColourDefaults,
    pub compositor_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkBackendOverride {
    NetworkManager,
    Iwd,
    Networkd,
}

#[derive(Debug, Clone, Copy)]
pub struct ColourDefaults {
    pub enabled: bool,
    pub low_temp: u32,
    pub high_temp: u32,
    pub gamma: f64,
    pub use_ip_location: bool,
}

impl Default for ColourDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            low_temp: 3500,
            high_temp: 6500,
            gamma: 1.0,
            use_ip_location: true,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_name: "quayside".to_string(),
            lock_before_suspend: true,
            network_backend_override: None,
            colour: ColourDefaults::default(),
            compositor_enabled: true,
        }
    }
}

/// Resolve the config path the daemon should use when `--config` was not
/// given: user path if it exists, else the `/etc` fallback, else the user
/// path (so error messages point at the expected location).
pub fn resolve_default_config_path() -> PathBuf {
    let primary = default_user_config_path();
    let fallback = PathBuf::from("/etc/quayside/quayside.rune");

    if primary.exists() {
        primary
    } else if fallback.exists() {
        fallback
    } else {
        primary
    }
}

fn default_user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quayside")
        .join("quayside.rune")
}

/// Load configuration from `path` if it exists, otherwise fall back to
/// built-in defaults. Parse/semantic failures are reported, not silently
/// swallowed, but never prevent daemon startup (spec.md §7: per-connection
/// and per-manager failures are recoverable; only a bind failure or running
/// as root is fatal).
pub fn load(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }

    let rune = RuneConfig::from_file(path)
        .wrap_err_with(|| format!("failed to parse config at {}", path.display()))?;

    let mut cfg = DaemonConfig::default();

    cfg.socket_name = rune
        .get::<String>("quayside.socket_name")
        .unwrap_or_else(|_| cfg.socket_name.clone());

    cfg.lock_before_suspend = rune
        .get::<bool>("loginctl.lock_before_suspend")
        .unwrap_or(cfg.lock_before_suspend);

    cfg.compositor_enabled = rune
        .get::<bool>("compositor.enabled")
        .unwrap_or(cfg.compositor_enabled);

    cfg.network_backend_override = rune
        .get::<String>("network.backend")
        .ok()
        .and_then(|s| match s.trim().to_lowercase().as_str() {
            "networkmanager" | "nm" => Some(NetworkBackendOverride::NetworkManager),
            "iwd" => Some(NetworkBackendOverride::Iwd),
            "networkd" => Some(NetworkBackendOverride::Networkd),
            _ => None,
        });

    cfg.colour.enabled = rune
        .get::<bool>("colour.enabled")
        .unwrap_or(cfg.colour.enabled);
    cfg.colour.low_temp = rune
        .get::<u32>("colour.low_temp")
        .unwrap_or(cfg.colour.low_temp);
    cfg.colour.high_temp = rune
        .get::<u32>("colour.high_temp")
        .unwrap_or(cfg.colour.high_temp);
    cfg.colour.gamma = rune
        .get::<f64>("colour.gamma")
        .unwrap_or(cfg.colour.gamma);
    cfg.colour.use_ip_location = rune
        .get::<bool>("colour.use_ip_location")
        .unwrap_or(cfg.colour.use_ip_location);

    Ok(cfg)
}
