// Author: Quayside contributors
// License: MIT

//! The network connectivity controller (spec.md §4.4): backend-polymorphic
//! Wi-Fi/Ethernet/VPN control, the connect-attempt classifier, and the
//! secret agent, composed behind one authoritative [`state::NetworkState`]
//! snapshot.

pub mod attempt;
pub mod backend;
pub mod secret_agent;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::core::notifier::Notifier;
use crate::error::NetworkErrorCode;
use crate::managers::prompt_broker::{PromptBroker, PromptReply};
use attempt::ConnectAttempt;
use backend::{Backend, WifiConnectArgs};
use state::{dedup_and_sort, NetworkState};

pub struct NetworkController {
    state: Arc<RwLock<NetworkState>>,
    backend: Backend,
    notifier: Notifier<NetworkState>,
    broker: Arc<PromptBroker>,
    attempt: Mutex<Option<ConnectAttempt>>,
    /// Kept alive only to hold the secret agent's bus registration; dropped
    /// on shutdown along with the rest of the controller.
    _agent_connection: Option<zbus::Connection>,
}

impl NetworkController {
    pub async fn new(
        broker: Arc<PromptBroker>,
        backend_override: Option<backend::Override>,
    ) -> Arc<Self> {
        let backend = backend::detect(backend_override).await;

        let agent_connection = if backend.supports_vpn() {
            match secret_agent::register(Arc::clone(&broker)).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    eventline::warn!("network: failed to register secret agent: {e}");
                    None
                }
            }
        } else {
            None
        };

        let state = Arc::new(RwLock::new(NetworkState::default()));
        let snapshot_state = Arc::clone(&state);
        let notifier = Notifier::spawn(
            move || {
                snapshot_state
                    .try_read()
                    .map(|g| g.clone())
                    .unwrap_or_default()
            },
            |prev, cur| {
                prev.status != cur.status
                    || prev.wifi.connected != cur.wifi.connected
                    || prev.wifi.current_ssid != cur.wifi.current_ssid
                    || prev.ethernet.connected != cur.ethernet.connected
                    || prev.active_vpns.len() != cur.active_vpns.len()
                    || prev.known_networks.len() != cur.known_networks.len()
                    || prev.is_connecting != cur.is_connecting
                    || prev.last_error != cur.last_error
            },
        );

        let controller = Arc::new(Self {
            state,
            backend,
            notifier,
            broker,
            attempt: Mutex::new(None),
            _agent_connection: agent_connection,
        });

        controller.refresh().await;
        controller
    }

    pub async fn get_state(&self) -> NetworkState {
        self.state.read().await.clone()
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<NetworkState> {
        self.notifier.subscribe().await
    }

    /// Re-derive the published snapshot from whatever the backend can tell
    /// us right now, then mark the notifier dirty.
    async fn refresh(&self) {
        let mut state = self.state.write().await;

        if self.backend.supports_wifi() {
            if let Ok(networks) = self.backend.wifi_list().await {
                let networks = dedup_and_sort(networks);
                state.wifi.connected = networks.iter().any(|n| n.connected);
                if let Some(current) = networks.iter().find(|n| n.connected) {
                    state.wifi.current_ssid = Some(current.ssid.clone());
                    state.wifi.current_bssid = Some(current.bssid.clone());
                    state.wifi.signal = current.signal;
                } else {
                    state.wifi.current_ssid = None;
                    state.wifi.current_bssid = None;
                    state.wifi.signal = 0;
                }
                state.known_networks = networks;
            }
        }

        if self.backend.supports_vpn() {
            if let Ok(profiles) = self.backend.vpn_list().await {
                state.vpn_profiles = profiles;
            }
            if let Ok(active) = self.backend.vpn_list_active().await {
                state.active_vpns = active;
            }
        }

        state.recompute_status();
        debug_assert!(state.check_invariants());
        drop(state);

        self.notifier.mark_dirty();
    }

    // --- Wi-Fi -----------------------------------------------------------

    pub async fn wifi_scan(&self) -> Result<(), String> {
        self.backend.wifi_scan().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn wifi_networks(&self) -> Vec<state::WifiNetwork> {
        self.state.read().await.known_networks.clone()
    }

    pub async fn wifi_connect(
        &self,
        ssid: &str,
        password: Option<&str>,
        username: Option<&str>,
        anonymous_identity: Option<&str>,
        domain_suffix_match: Option<&str>,
    ) -> Result<(), NetworkErrorCode> {
        {
            let mut state = self.state.write().await;
            state.is_connecting = true;
            state.connecting_ssid = ssid.to_string();
        }

        let mut guard = self.attempt.lock().await;
        *guard = Some(ConnectAttempt::start(ssid.to_string(), ssid.to_string()));
        drop(guard);

        let result = self
            .backend
            .wifi_connect(WifiConnectArgs {
                ssid,
                password,
                username,
                anonymous_identity,
                domain_suffix_match,
            })
            .await;

        let mut guard = self.attempt.lock().await;
        let outcome = match &result {
            Ok(()) => {
                if let Some(attempt) = guard.as_mut() {
                    attempt.on_authish();
                    attempt.on_ip_config();
                    attempt.on_connected();
                }
                None
            }
            Err(_) => guard.as_mut().map(|a| a.finalise()),
        };
        drop(guard);

        {
            let mut state = self.state.write().await;
            state.is_connecting = false;
            state.connecting_ssid.clear();
            if let Some(code) = outcome {
                state.last_error = code.to_string();
            }
        }
        self.refresh().await;

        match (result, outcome) {
            (Ok(()), _) => Ok(()),
            (Err(_), Some(code)) => Err(code),
            (Err(_), None) => Err(NetworkErrorCode::ConnectionFailed),
        }
    }

    pub async fn wifi_disconnect(&self) -> Result<(), String> {
        self.backend.wifi_disconnect().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn wifi_forget(&self, ssid: &str) -> Result<(), String> {
        self.backend.wifi_forget(ssid).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn wifi_enable(&self) -> Result<(), String> {
        self.backend.wifi_set_enabled(true).await?;
        self.state.write().await.wifi.enabled = true;
        self.refresh().await;
        Ok(())
    }

    pub async fn wifi_disable(&self) -> Result<(), String> {
        self.backend.wifi_set_enabled(false).await?;
        let mut state = self.state.write().await;
        state.wifi.enabled = false;
        state.wifi.connected = false;
        drop(state);
        self.refresh().await;
        Ok(())
    }

    pub async fn wifi_toggle(&self) -> Result<bool, String> {
        let enabled = self.state.read().await.wifi.enabled;
        if enabled {
            self.wifi_disable().await?;
        } else {
            self.wifi_enable().await?;
        }
        Ok(!enabled)
    }

    // --- Ethernet ----------------------------------------------------------

    pub async fn ethernet_connect(&self) -> Result<(), String> {
        self.backend.ethernet_connect().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn ethernet_disconnect(&self) -> Result<(), String> {
        self.backend.ethernet_disconnect().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn ethernet_activate(&self, uuid: &str) -> Result<(), String> {
        self.backend.ethernet_activate(uuid).await?;
        self.refresh().await;
        Ok(())
    }

    // --- VPN -----------------------------------------------------------

    pub async fn vpn_list(&self) -> Vec<state::VpnProfile> {
        self.state.read().await.vpn_profiles.clone()
    }

    pub async fn vpn_list_active(&self) -> Vec<state::ActiveVpn> {
        self.state.read().await.active_vpns.clone()
    }

    pub async fn vpn_connect(&self, id: &str, single_active: bool) -> Result<(), String> {
        self.backend.vpn_connect(id, single_active).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn vpn_disconnect(&self, id: &str) -> Result<(), String> {
        self.backend.vpn_disconnect(id).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn vpn_disconnect_all(&self) -> Result<(), String> {
        self.backend.vpn_disconnect_all().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn vpn_clear_credentials(&self, id: &str) -> Result<(), String> {
        self.backend.vpn_clear_credentials(id).await
    }

    // --- Credentials -----------------------------------------------------

    pub async fn credentials_submit(
        &self,
        token: &str,
        secrets: HashMap<String, String>,
        save: bool,
    ) -> Result<(), String> {
        self.broker
            .resolve(
                token,
                PromptReply {
                    secrets,
                    save,
                    cancel: false,
                },
            )
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn credentials_cancel(&self, token: &str) -> Result<(), String> {
        self.broker
            .resolve(
                token,
                PromptReply {
                    secrets: HashMap::new(),
                    save: false,
                    cancel: true,
                },
            )
            .await
            .map_err(|e| e.to_string())
    }
}
