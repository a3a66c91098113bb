// Author: Quayside contributors
// License: MIT

//! The top-level daemon: owns every manager and the transport listener
//! (spec.md §2, §5). Each manager's failure to initialise is independent —
//! a manager that didn't come up is simply absent from the capability
//! banner and the router refuses calls naming it (spec.md §4.8).

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::DaemonConfig;
use crate::managers::colour::state::ColourConfig;
use crate::managers::colour::ColourController;
use crate::managers::compositor::CompositorMirror;
use crate::managers::freedesktop::FreedeskBridge;
use crate::managers::login::LoginSessionController;
use crate::managers::network::NetworkController;
use crate::managers::prompt_broker::PromptBroker;
use crate::transport;

pub struct Daemon {
    pub socket_name: String,
    pub network: Option<Arc<NetworkController>>,
    pub login: Option<Arc<LoginSessionController>>,
    pub colour: Option<Arc<ColourController>>,
    pub compositor: Option<Arc<CompositorMirror>>,
    pub freedesktop: Option<Arc<FreedeskBridge>>,
    pub broker: Arc<PromptBroker>,
}

impl Daemon {
    /// Bring up every manager in acquisition order (network, login, colour,
    /// compositor, freedesktop), logging and continuing past any that
    /// fails.
    pub async fn new(config: &DaemonConfig) -> Self {
        let broker = PromptBroker::new();

        let backend_override = config.network_backend_override.map(|o| match o {
            crate::config::NetworkBackendOverride::NetworkManager => {
                crate::managers::network::backend::Override::NetworkManager
            }
            crate::config::NetworkBackendOverride::Iwd => {
                crate::managers::network::backend::Override::Iwd
            }
            crate::config::NetworkBackendOverride::Networkd => {
                crate::managers::network::backend::Override::Networkd
            }
        });
        let network = Some(NetworkController::new(Arc::clone(&broker), backend_override).await);

        let login = match LoginSessionController::new(config.lock_before_suspend).await {
            Ok(ctrl) => Some(ctrl),
            Err(e) => {
                eventline::error!("login: failed to initialise: {e}");
                None
            }
        };

        let colour_config = ColourConfig {
            enabled: config.colour.enabled,
            low_temp: config.colour.low_temp,
            high_temp: config.colour.high_temp,
            gamma: config.colour.gamma,
            use_ip_location: config.colour.use_ip_location,
            manual_sunrise_minutes: None,
            manual_sunset_minutes: None,
            explicit_coords: None,
        };
        let colour = Some(ColourController::new(colour_config).await);

        let compositor = if config.compositor_enabled {
            Some(CompositorMirror::new(9, vec!["tile".to_string(), "monocle".to_string()]))
        } else {
            None
        };

        let freedesktop = match FreedeskBridge::connect().await {
            Ok(bridge) => Some(Arc::new(bridge)),
            Err(e) => {
                eventline::warn!("freedesktop: failed to initialise: {e}");
                None
            }
        };

        Self {
            socket_name: config.socket_name.clone(),
            network,
            login,
            colour,
            compositor,
            freedesktop,
            broker,
        }
    }

    /// The greeting's capability list (spec.md §4.1): the managers that
    /// initialised successfully.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut caps = Vec::new();
        if self.network.is_some() {
            caps.push("network");
        }
        if self.login.is_some() {
            caps.push("loginctl");
        }
        if self.colour.is_some() {
            caps.push("colour");
        }
        if self.compositor.is_some() {
            caps.push("compositor");
        }
        if self.freedesktop.is_some() {
            caps.push("freedesktop");
        }
        caps
    }

    /// Run the transport listener until `shutdown_rx` fires, then tear
    /// managers down in the reverse of acquisition order.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), crate::error::AnyError> {
        let listen_task = tokio::spawn({
            let daemon = Arc::clone(&self);
            let shutdown_rx = shutdown_rx.clone();
            async move { transport::serve(daemon, shutdown_rx).await }
        });

        let _ = shutdown_rx.changed().await;

        if let Some(compositor) = &self.compositor {
            compositor.shutdown();
        }
        if let Some(colour) = &self.colour {
            colour.shutdown();
        }

        match listen_task.await {
            Ok(result) => result,
            Err(join_err) => Err(Box::new(join_err)),
        }
    }
}
