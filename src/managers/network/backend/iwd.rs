// Author: Quayside contributors
// License: MIT

//! The wireless-only backend, driving iwd's `net.connman.iwd` D-Bus API
//! (spec.md §4.4). VPN and wired profile management are not supported by
//! this backend.

use zbus::{Connection, Proxy};

use super::WifiConnectArgs;
use crate::managers::network::state::{WifiMode, WifiNetwork};

const BUS: &str = "net.connman.iwd";

pub struct IwdBackend {
    conn: Connection,
    device_path: zbus::zvariant::OwnedObjectPath,
}

impl IwdBackend {
    pub async fn connect() -> Result<Self, String> {
        let conn = Connection::system().await.map_err(|e| e.to_string())?;
        let device_path = Self::find_station(&conn).await?;
        eventline::info!("network: using iwd backend");
        Ok(Self { conn, device_path })
    }

    async fn find_station(conn: &Connection) -> Result<zbus::zvariant::OwnedObjectPath, String> {
        let om = Proxy::new(
            conn,
            BUS,
            "/",
            "org.freedesktop.DBus.ObjectManager",
        )
        .await
        .map_err(|e| e.to_string())?;

        let objects: std::collections::HashMap<
            zbus::zvariant::OwnedObjectPath,
            std::collections::HashMap<String, std::collections::HashMap<String, zbus::zvariant::OwnedValue>>,
        > = om
            .call_method("GetManagedObjects", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        objects
            .into_iter()
            .find(|(_, ifaces)| ifaces.contains_key("net.connman.iwd.Station"))
            .map(|(path, _)| path)
            .ok_or_else(|| "no iwd station device found".into())
    }

    async fn station(&self) -> Result<Proxy<'_>, String> {
        Proxy::new(
            &self.conn,
            BUS,
            self.device_path.clone(),
            "net.connman.iwd.Station",
        )
        .await
        .map_err(|e| e.to_string())
    }

    pub async fn wifi_scan(&self) -> Result<(), String> {
        self.station()
            .await?
            .call_method("Scan", &())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_list(&self) -> Result<Vec<WifiNetwork>, String> {
        let station = self.station().await?;
        let current_network: zbus::zvariant::OwnedObjectPath =
            station.get_property("ConnectedNetwork").await.unwrap_or_default();

        let results: Vec<(zbus::zvariant::OwnedObjectPath, i16)> = station
            .call_method("GetOrderedNetworks", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        let mut out = Vec::with_capacity(results.len());
        for (path, signal_dbm_hundredths) in results {
            let network = Proxy::new(&self.conn, BUS, path.clone(), "net.connman.iwd.Network")
                .await
                .map_err(|e| e.to_string())?;
            let name: String = network.get_property("Name").await.unwrap_or_default();
            let net_type: String = network.get_property("Type").await.unwrap_or_default();

            // iwd reports signal in hundredths of a dBm; normalise to 0-100.
            let signal = (((signal_dbm_hundredths as f64 / 100.0) + 100.0).clamp(0.0, 100.0)) as u8;

            out.push(WifiNetwork {
                ssid: name,
                bssid: String::new(),
                signal,
                secured: net_type != "open",
                enterprise: net_type == "8021x",
                connected: path == current_network,
                saved: false,
                frequency: 0,
                mode: WifiMode::Infrastructure,
                rate: 0,
            });
        }
        Ok(out)
    }

    pub async fn wifi_connect(&self, args: WifiConnectArgs<'_>) -> Result<(), String> {
        let station = self.station().await?;
        let results: Vec<(zbus::zvariant::OwnedObjectPath, i16)> = station
            .call_method("GetOrderedNetworks", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        let mut target = None;
        for (path, _) in results {
            let network = Proxy::new(&self.conn, BUS, path.clone(), "net.connman.iwd.Network")
                .await
                .map_err(|e| e.to_string())?;
            let name: String = network.get_property("Name").await.unwrap_or_default();
            if name == args.ssid {
                target = Some(network);
                break;
            }
        }
        let network = target.ok_or_else(|| format!("no such ssid: {}", args.ssid))?;
        // iwd prompts for secrets via its own agent, registered separately
        // by the secret-agent module; Connect blocks until that completes.
        network
            .call_method("Connect", &())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_disconnect(&self) -> Result<(), String> {
        self.station()
            .await?
            .call_method("Disconnect", &())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_forget(&self, ssid: &str) -> Result<(), String> {
        let known_networks = Proxy::new(&self.conn, BUS, "/", "org.freedesktop.DBus.ObjectManager")
            .await
            .map_err(|e| e.to_string())?;
        let objects: std::collections::HashMap<
            zbus::zvariant::OwnedObjectPath,
            std::collections::HashMap<String, std::collections::HashMap<String, zbus::zvariant::OwnedValue>>,
        > = known_networks
            .call_method("GetManagedObjects", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        for (path, ifaces) in objects {
            let Some(props) = ifaces.get("net.connman.iwd.KnownNetwork") else {
                continue;
            };
            let name = props
                .get("Name")
                .and_then(|v| v.downcast_ref::<String>().ok())
                .unwrap_or_default();
            if name == ssid {
                let proxy = Proxy::new(&self.conn, BUS, path, "net.connman.iwd.KnownNetwork")
                    .await
                    .map_err(|e| e.to_string())?;
                proxy
                    .call_method("Forget", &())
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(());
            }
        }
        Err(format!("no saved profile for {ssid}"))
    }

    pub async fn wifi_set_enabled(&self, enabled: bool) -> Result<(), String> {
        let device = Proxy::new(&self.conn, BUS, self.device_path.clone(), "net.connman.iwd.Device")
            .await
            .map_err(|e| e.to_string())?;
        device
            .set_property("Powered", enabled)
            .await
            .map_err(|e| e.to_string())
    }
}
