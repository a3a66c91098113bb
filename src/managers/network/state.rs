// Author: Quayside contributors
// License: MIT

use serde::Serialize;

/// Overall connectivity status (spec.md §3 NetworkState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Disconnected,
    Ethernet,
    Wifi,
    Vpn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Auto,
    Wifi,
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WifiMode {
    Adhoc,
    Infrastructure,
    Ap,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiNetwork {
    pub ssid: String,
    pub bssid: String,
    /// 0-100
    pub signal: u8,
    pub secured: bool,
    pub enterprise: bool,
    pub connected: bool,
    pub saved: bool,
    /// MHz
    pub frequency: u32,
    pub mode: WifiMode,
    /// Mbit/s
    pub rate: u32,
}

impl WifiNetwork {
    /// Channel number derived from frequency per the 2.4/5/6 GHz band maps.
    pub fn channel(&self) -> u32 {
        match self.frequency {
            2412..=2484 => {
                if self.frequency == 2484 {
                    14
                } else {
                    (self.frequency - 2412) / 5 + 1
                }
            }
            5000..=5999 => (self.frequency - 5000) / 5,
            5955..=7115 => (self.frequency - 5950) / 5 + 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnConnectionState {
    Activating,
    Activated,
    Deactivating,
    Deactivated,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnProfile {
    pub id: String,
    pub name: String,
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveVpn {
    pub id: String,
    pub name: String,
    pub state: VpnConnectionState,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthernetState {
    pub device: Option<String>,
    pub ipv4: Option<String>,
    pub connected: bool,
    pub active_profile_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiState {
    pub device: Option<String>,
    pub ipv4: Option<String>,
    pub connected: bool,
    pub enabled: bool,
    pub current_ssid: Option<String>,
    pub current_bssid: Option<String>,
    /// 0-100
    pub signal: u8,
}

/// The authoritative in-memory snapshot for the network manager (spec.md §3).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub status: Status,
    pub preference: Preference,

    pub ethernet: EthernetState,
    pub wifi: WifiState,

    pub known_networks: Vec<WifiNetwork>,
    pub known_wired_profiles: Vec<String>,

    pub vpn_profiles: Vec<VpnProfile>,
    pub active_vpns: Vec<ActiveVpn>,

    pub is_connecting: bool,
    pub connecting_ssid: String,

    pub last_error: String,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            status: Status::Disconnected,
            preference: Preference::Auto,
            ethernet: EthernetState::default(),
            wifi: WifiState::default(),
            known_networks: Vec::new(),
            known_wired_profiles: Vec::new(),
            vpn_profiles: Vec::new(),
            active_vpns: Vec::new(),
            is_connecting: false,
            connecting_ssid: String::new(),
            last_error: String::new(),
        }
    }
}

impl NetworkState {
    /// True if every documented invariant holds (spec.md §3, §8 invariant 1).
    /// Used by tests and, defensively, wherever state is recomputed after an
    /// external event before being published.
    pub fn check_invariants(&self) -> bool {
        let wifi_ok = !self.wifi.connected || self.wifi.enabled;

        let has_active_vpn = self
            .active_vpns
            .iter()
            .any(|v| v.state == VpnConnectionState::Activated);

        let status_wifi_ok =
            (self.status == Status::Wifi) == (self.wifi.connected && !has_active_vpn);
        let status_vpn_ok = (self.status == Status::Vpn) == has_active_vpn;

        let connecting_ok = self.is_connecting == !self.connecting_ssid.is_empty();

        wifi_ok && status_wifi_ok && status_vpn_ok && connecting_ok
    }

    /// Recompute `status` from the other fields; called after any mutation
    /// so the invariant in spec.md §3 always holds by construction.
    pub fn recompute_status(&mut self) {
        let has_active_vpn = self
            .active_vpns
            .iter()
            .any(|v| v.state == VpnConnectionState::Activated);

        self.status = if has_active_vpn {
            Status::Vpn
        } else if self.wifi.connected {
            Status::Wifi
        } else if self.ethernet.connected {
            Status::Ethernet
        } else {
            Status::Disconnected
        };
    }
}

/// Deduplicate by SSID keeping the best-signal BSSID, then order: connected
/// first, then open networks with signal >= 50 before secured, then
/// descending signal (spec.md §4.4 `wifi.networks`).
pub fn dedup_and_sort(mut networks: Vec<WifiNetwork>) -> Vec<WifiNetwork> {
    use std::collections::HashMap;

    let mut best: HashMap<String, WifiNetwork> = HashMap::new();
    for net in networks.drain(..) {
        best.entry(net.ssid.clone())
            .and_modify(|existing| {
                if net.signal > existing.signal {
                    *existing = net.clone();
                }
            })
            .or_insert(net);
    }

    let mut out: Vec<WifiNetwork> = best.into_values().collect();
    out.sort_by(|a, b| {
        let rank = |n: &WifiNetwork| -> (i32, i32) {
            if n.connected {
                (0, -(n.signal as i32))
            } else if !n.secured && n.signal >= 50 {
                (1, -(n.signal as i32))
            } else {
                (2, -(n.signal as i32))
            }
        };
        rank(a).cmp(&rank(b))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(ssid: &str, bssid: &str, signal: u8, secured: bool, connected: bool) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.to_string(),
            bssid: bssid.to_string(),
            signal,
            secured,
            enterprise: false,
            connected,
            saved: false,
            frequency: 2437,
            mode: WifiMode::Infrastructure,
            rate: 0,
        }
    }

    #[test]
    fn default_state_satisfies_invariants() {
        assert!(NetworkState::default().check_invariants());
    }

    #[test]
    fn wifi_connected_requires_enabled() {
        let mut s = NetworkState::default();
        s.wifi.connected = true;
        s.wifi.enabled = false;
        assert!(!s.check_invariants());
        s.wifi.enabled = true;
        assert!(s.check_invariants());
    }

    #[test]
    fn status_matches_derived_invariants() {
        let mut s = NetworkState::default();
        s.wifi.connected = true;
        s.wifi.enabled = true;
        s.recompute_status();
        assert_eq!(s.status, Status::Wifi);
        assert!(s.check_invariants());

        s.active_vpns.push(ActiveVpn {
            id: "work".into(),
            name: "Work VPN".into(),
            state: VpnConnectionState::Activated,
            banner: None,
        });
        s.recompute_status();
        assert_eq!(s.status, Status::Vpn);
        assert!(s.check_invariants());
    }

    #[test]
    fn dedup_keeps_best_signal_and_sorts() {
        let nets = vec![
            net("Cafe", "aa:1", 40, false, false),
            net("Cafe", "aa:2", 70, false, false),
            net("Home", "bb:1", 90, true, true),
            net("Open", "cc:1", 55, false, false),
        ];

        let sorted = dedup_and_sort(nets);
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].ssid, "Home"); // connected first
        assert_eq!(sorted[1].ssid, "Open"); // open, signal>=50
        assert_eq!(sorted[2].ssid, "Cafe");
        assert_eq!(sorted[2].signal, 70); // best BSSID kept
    }
}
