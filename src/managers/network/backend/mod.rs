// Author: Quayside contributors
// License: MIT

//! Backend-polymorphic network control (spec.md §4.4 "Backend selection").
//!
//! `Backend` is a closed tagged variant over the three OS integrations
//! quayside knows how to drive, chosen once at startup and stored as the
//! concrete variant — no runtime downcasts in hot paths (spec.md §9).

pub mod iwd;
pub mod networkd;
pub mod networkmanager;

use crate::managers::network::attempt::OsReasonCode;
use crate::managers::network::state::{ActiveVpn, VpnProfile, WifiNetwork};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    NetworkManager,
    Iwd,
    Networkd,
}

pub struct WifiConnectArgs<'a> {
    pub ssid: &'a str,
    pub password: Option<&'a str>,
    pub username: Option<&'a str>,
    pub anonymous_identity: Option<&'a str>,
    pub domain_suffix_match: Option<&'a str>,
}

/// A connection-state observation emitted by a backend's event stream,
/// normalised into the vocabulary the attempt classifier understands
/// (spec.md §4.4's transition table).
#[derive(Debug, Clone)]
pub enum ConnectionObservation {
    Authish,
    IpConfig,
    Connected { ssid: String },
    PromptRetry,
    Terminated { reason: Option<OsReasonCode> },
}

pub enum Backend {
    NetworkManager(networkmanager::NetworkManagerBackend),
    Iwd(iwd::IwdBackend),
    Networkd(networkd::NetworkdBackend),
}

impl Backend {
    pub fn kind(&self) -> Kind {
        match self {
            Backend::NetworkManager(_) => Kind::NetworkManager,
            Backend::Iwd(_) => Kind::Iwd,
            Backend::Networkd(_) => Kind::Networkd,
        }
    }

    pub fn supports_wifi(&self) -> bool {
        !matches!(self, Backend::Networkd(_))
    }

    pub fn supports_vpn(&self) -> bool {
        matches!(self, Backend::NetworkManager(_))
    }

    pub async fn wifi_scan(&self) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_scan().await,
            Backend::Iwd(b) => b.wifi_scan().await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn wifi_list(&self) -> Result<Vec<WifiNetwork>, String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_list().await,
            Backend::Iwd(b) => b.wifi_list().await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn wifi_connect(&self, args: WifiConnectArgs<'_>) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_connect(args).await,
            Backend::Iwd(b) => b.wifi_connect(args).await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn wifi_disconnect(&self) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_disconnect().await,
            Backend::Iwd(b) => b.wifi_disconnect().await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn wifi_forget(&self, ssid: &str) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_forget(ssid).await,
            Backend::Iwd(b) => b.wifi_forget(ssid).await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn wifi_set_enabled(&self, enabled: bool) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.wifi_set_enabled(enabled).await,
            Backend::Iwd(b) => b.wifi_set_enabled(enabled).await,
            Backend::Networkd(_) => Err("not supported".into()),
        }
    }

    pub async fn ethernet_connect(&self) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.ethernet_connect().await,
            Backend::Iwd(_) => Err("not supported".into()),
            Backend::Networkd(b) => b.ethernet_connect().await,
        }
    }

    pub async fn ethernet_disconnect(&self) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.ethernet_disconnect().await,
            Backend::Iwd(_) => Err("not supported".into()),
            Backend::Networkd(b) => b.ethernet_disconnect().await,
        }
    }

    pub async fn ethernet_activate(&self, uuid: &str) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.ethernet_activate(uuid).await,
            Backend::Iwd(_) => Err("not supported".into()),
            Backend::Networkd(b) => b.ethernet_activate(uuid).await,
        }
    }

    pub async fn vpn_list(&self) -> Result<Vec<VpnProfile>, String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_list().await,
            _ => Ok(Vec::new()),
        }
    }

    pub async fn vpn_list_active(&self) -> Result<Vec<ActiveVpn>, String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_list_active().await,
            _ => Ok(Vec::new()),
        }
    }

    pub async fn vpn_connect(&self, id: &str, single_active: bool) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_connect(id, single_active).await,
            _ => Err("not supported".into()),
        }
    }

    pub async fn vpn_disconnect(&self, id: &str) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_disconnect(id).await,
            _ => Err("not supported".into()),
        }
    }

    pub async fn vpn_disconnect_all(&self) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_disconnect_all().await,
            _ => Ok(()),
        }
    }

    pub async fn vpn_clear_credentials(&self, id: &str) -> Result<(), String> {
        match self {
            Backend::NetworkManager(b) => b.vpn_clear_credentials(id).await,
            _ => Err("not supported".into()),
        }
    }
}

/// A forced backend choice from `DaemonConfig::network_backend_override`.
/// When the configured backend fails to connect, `detect` falls back to the
/// normal auto-probe order rather than leaving the controller without any
/// backend at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Override {
    NetworkManager,
    Iwd,
    Networkd,
}

/// Probe the system for the best available backend, in the priority order
/// of spec.md §4.4: full-featured manager, else wireless daemon + link
/// daemon, else link daemon only. `forced`, when set, tries only the
/// configured backend first (falling back to auto-probe if it is absent).
pub async fn detect(forced: Option<Override>) -> Backend {
    match forced {
        Some(Override::NetworkManager) => {
            if let Ok(b) = networkmanager::NetworkManagerBackend::connect().await {
                return Backend::NetworkManager(b);
            }
            eventline::warn!("network: configured backend networkmanager unavailable, falling back to auto-detect");
        }
        Some(Override::Iwd) => {
            if let Ok(b) = iwd::IwdBackend::connect().await {
                return Backend::Iwd(b);
            }
            eventline::warn!("network: configured backend iwd unavailable, falling back to auto-detect");
        }
        Some(Override::Networkd) => {
            return Backend::Networkd(networkd::NetworkdBackend::connect().await);
        }
        None => {}
    }

    if let Ok(b) = networkmanager::NetworkManagerBackend::connect().await {
        return Backend::NetworkManager(b);
    }
    if let Ok(b) = iwd::IwdBackend::connect().await {
        return Backend::Iwd(b);
    }
    Backend::Networkd(networkd::NetworkdBackend::connect().await)
}
