// Author: Quayside contributors
// License: MIT

//! The link-only backend, driving `org.freedesktop.network1` (spec.md
//! §4.4). This is the lowest rung of the priority chain: wired links only,
//! no Wi-Fi, no VPN. Construction never fails — if the bus is unreachable,
//! every operation below simply errors when invoked.

use zbus::{Connection, Proxy};

const BUS: &str = "org.freedesktop.network1";
const MANAGER_PATH: &str = "/org/freedesktop/network1";

pub struct NetworkdBackend {
    conn: Option<Connection>,
}

impl NetworkdBackend {
    pub async fn connect() -> Self {
        match Connection::system().await {
            Ok(conn) => {
                eventline::info!("network: using networkd backend (wired only)");
                Self { conn: Some(conn) }
            }
            Err(e) => {
                eventline::warn!("network: system bus unreachable, networkd backend is inert: {e}");
                Self { conn: None }
            }
        }
    }

    async fn manager(&self) -> Result<Proxy<'_>, String> {
        let conn = self.conn.as_ref().ok_or("system bus unreachable")?;
        Proxy::new(
            conn,
            BUS,
            MANAGER_PATH,
            "org.freedesktop.network1.Manager",
        )
        .await
        .map_err(|e| e.to_string())
    }

    /// Links whose name starts with one of these prefixes are virtual
    /// (bridges, bonds, veths, tunnels) and excluded from ethernet device
    /// selection.
    const VIRTUAL_PREFIXES: &'static [&'static str] =
        &["veth", "docker", "br-", "virbr", "tun", "tap", "wg", "lo"];

    fn is_virtual_interface(name: &str) -> bool {
        Self::VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    async fn first_ethernet_link(&self) -> Result<String, String> {
        let manager = self.manager().await?;
        let links: Vec<(i32, String, zbus::zvariant::OwnedObjectPath)> = manager
            .call_method("ListLinks", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        links
            .into_iter()
            .map(|(_, name, _)| name)
            .find(|name| !Self::is_virtual_interface(name))
            .ok_or_else(|| "no ethernet link found".into())
    }

    pub async fn ethernet_connect(&self) -> Result<(), String> {
        let link = self.first_ethernet_link().await?;
        let manager = self.manager().await?;
        manager
            .call_method("ReconfigureLink", &(link,))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn ethernet_disconnect(&self) -> Result<(), String> {
        Err("networkd backend cannot tear down a link".into())
    }

    pub async fn ethernet_activate(&self, _uuid: &str) -> Result<(), String> {
        // networkd has no concept of named connection profiles; re-apply the
        // single static .network unit instead.
        self.ethernet_connect().await
    }
}
