// Author: Quayside contributors
// License: MIT

//! The full-featured backend, driving `org.freedesktop.NetworkManager` over
//! the system bus (spec.md §4.4). Supports Wi-Fi, Ethernet, and VPN.

use std::collections::HashMap;

use zbus::{zvariant::Value, Connection, Proxy};

use super::WifiConnectArgs;
use crate::managers::network::state::{
    ActiveVpn, VpnConnectionState, VpnProfile, WifiMode, WifiNetwork,
};

const BUS: &str = "org.freedesktop.NetworkManager";
const MANAGER_PATH: &str = "/org/freedesktop/NetworkManager";
const MANAGER_IFACE: &str = "org.freedesktop.NetworkManager";

pub struct NetworkManagerBackend {
    conn: Connection,
}

impl NetworkManagerBackend {
    pub async fn connect() -> Result<Self, String> {
        let conn = Connection::system().await.map_err(|e| e.to_string())?;
        // Touching the manager's Version property confirms the service is
        // actually present rather than just the bus reachable.
        let proxy = Proxy::new(&conn, BUS, MANAGER_PATH, MANAGER_IFACE)
            .await
            .map_err(|e| e.to_string())?;
        let _: String = proxy
            .get_property("Version")
            .await
            .map_err(|e| e.to_string())?;
        eventline::info!("network: using NetworkManager backend");
        Ok(Self { conn })
    }

    async fn manager(&self) -> Result<Proxy<'_>, String> {
        Proxy::new(&self.conn, BUS, MANAGER_PATH, MANAGER_IFACE)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn wifi_scan(&self) -> Result<(), String> {
        let device = self.wifi_device_path().await?;
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            device,
            "org.freedesktop.NetworkManager.Device.Wireless",
        )
        .await
        .map_err(|e| e.to_string())?;
        let options: HashMap<&str, Value> = HashMap::new();
        proxy
            .call_method("RequestScan", &(options,))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_list(&self) -> Result<Vec<WifiNetwork>, String> {
        let device = self.wifi_device_path().await?;
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            device,
            "org.freedesktop.NetworkManager.Device.Wireless",
        )
        .await
        .map_err(|e| e.to_string())?;
        let aps: Vec<zbus::zvariant::OwnedObjectPath> = proxy
            .call_method("GetAllAccessPoints", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        let active_ap: zbus::zvariant::OwnedObjectPath = proxy
            .get_property("ActiveAccessPoint")
            .await
            .unwrap_or_default();

        let mut out = Vec::with_capacity(aps.len());
        for ap_path in aps {
            if let Ok(net) = self.read_access_point(&ap_path, ap_path == active_ap).await {
                out.push(net);
            }
        }
        Ok(out)
    }

    async fn read_access_point(
        &self,
        path: &zbus::zvariant::OwnedObjectPath,
        connected: bool,
    ) -> Result<WifiNetwork, String> {
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            path.clone(),
            "org.freedesktop.NetworkManager.AccessPoint",
        )
        .await
        .map_err(|e| e.to_string())?;

        let ssid_bytes: Vec<u8> = proxy.get_property("Ssid").await.unwrap_or_default();
        let bssid: String = proxy.get_property("HwAddress").await.unwrap_or_default();
        let strength: u8 = proxy.get_property("Strength").await.unwrap_or(0);
        let frequency: u32 = proxy.get_property("Frequency").await.unwrap_or(0);
        let max_bitrate: u32 = proxy.get_property("MaxBitrate").await.unwrap_or(0);
        let wpa_flags: u32 = proxy.get_property("WpaFlags").await.unwrap_or(0);
        let rsn_flags: u32 = proxy.get_property("RsnFlags").await.unwrap_or(0);
        let mode_raw: u32 = proxy.get_property("Mode").await.unwrap_or(0);

        Ok(WifiNetwork {
            ssid: String::from_utf8_lossy(&ssid_bytes).into_owned(),
            bssid,
            signal: strength,
            secured: wpa_flags != 0 || rsn_flags != 0,
            enterprise: (wpa_flags | rsn_flags) & 0x200 != 0, // KEY_MGMT_802_1X
            connected,
            saved: false,
            frequency,
            mode: match mode_raw {
                1 => WifiMode::Adhoc,
                2 => WifiMode::Infrastructure,
                3 => WifiMode::Ap,
                _ => WifiMode::Unknown,
            },
            rate: max_bitrate / 1000,
        })
    }

    async fn wifi_device_path(&self) -> Result<zbus::zvariant::OwnedObjectPath, String> {
        let manager = self.manager().await?;
        let devices: Vec<zbus::zvariant::OwnedObjectPath> = manager
            .call_method("GetDevices", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        for dev in devices {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                dev.clone(),
                "org.freedesktop.NetworkManager.Device",
            )
            .await
            .map_err(|e| e.to_string())?;
            let dtype: u32 = proxy.get_property("DeviceType").await.unwrap_or(0);
            if dtype == 2 {
                // NM_DEVICE_TYPE_WIFI
                return Ok(dev);
            }
        }
        Err("no wifi device found".into())
    }

    async fn ethernet_device_path(&self) -> Result<zbus::zvariant::OwnedObjectPath, String> {
        let manager = self.manager().await?;
        let devices: Vec<zbus::zvariant::OwnedObjectPath> = manager
            .call_method("GetDevices", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        for dev in devices {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                dev.clone(),
                "org.freedesktop.NetworkManager.Device",
            )
            .await
            .map_err(|e| e.to_string())?;
            let dtype: u32 = proxy.get_property("DeviceType").await.unwrap_or(0);
            if dtype == 1 {
                // NM_DEVICE_TYPE_ETHERNET
                return Ok(dev);
            }
        }
        Err("no ethernet device found".into())
    }

    pub async fn wifi_connect(&self, args: WifiConnectArgs<'_>) -> Result<(), String> {
        let device = self.wifi_device_path().await?;
        let manager = self.manager().await?;

        let mut wifi_settings: HashMap<&str, Value> = HashMap::new();
        wifi_settings.insert("ssid", Value::new(args.ssid.as_bytes().to_vec()));

        let mut connection: HashMap<&str, HashMap<&str, Value>> = HashMap::new();
        connection.insert("802-11-wireless", wifi_settings);

        if let Some(password) = args.password {
            let mut security: HashMap<&str, Value> = HashMap::new();
            security.insert("psk", Value::new(password.to_string()));
            connection.insert("802-11-wireless-security", security);
        }

        if let Some(username) = args.username {
            let mut eap: HashMap<&str, Value> = HashMap::new();
            eap.insert("identity", Value::new(username.to_string()));
            if let Some(anon) = args.anonymous_identity {
                eap.insert("anonymous-identity", Value::new(anon.to_string()));
            }
            if let Some(domain) = args.domain_suffix_match {
                eap.insert("domain-suffix-match", Value::new(domain.to_string()));
            }
            connection.insert("802-1x", eap);
        }

        manager
            .call_method(
                "AddAndActivateConnection",
                &(connection, device, zbus::zvariant::ObjectPath::try_from("/").unwrap()),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_disconnect(&self) -> Result<(), String> {
        let device = self.wifi_device_path().await?;
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            device,
            "org.freedesktop.NetworkManager.Device",
        )
        .await
        .map_err(|e| e.to_string())?;
        proxy
            .call_method("Disconnect", &())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn wifi_forget(&self, ssid: &str) -> Result<(), String> {
        let settings = Proxy::new(
            &self.conn,
            BUS,
            "/org/freedesktop/NetworkManager/Settings",
            "org.freedesktop.NetworkManager.Settings",
        )
        .await
        .map_err(|e| e.to_string())?;

        let profiles: Vec<zbus::zvariant::OwnedObjectPath> = settings
            .call_method("ListConnections", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        for profile in profiles {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                profile.clone(),
                "org.freedesktop.NetworkManager.Settings.Connection",
            )
            .await
            .map_err(|e| e.to_string())?;
            let settings_map: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>> = proxy
                .call_method("GetSettings", &())
                .await
                .map_err(|e| e.to_string())?
                .body()
                .deserialize()
                .map_err(|e| e.to_string())?;

            let matches = settings_map
                .get("802-11-wireless")
                .and_then(|w| w.get("ssid"))
                .and_then(|v| v.downcast_ref::<Vec<u8>>().ok())
                .map(|bytes| String::from_utf8_lossy(&bytes) == ssid)
                .unwrap_or(false);

            if matches {
                proxy
                    .call_method("Delete", &())
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(());
            }
        }
        eventline::error!("network: no saved profile for ssid {}", ssid);
        Err(format!("no saved profile for {ssid}"))
    }

    pub async fn wifi_set_enabled(&self, enabled: bool) -> Result<(), String> {
        let manager = self.manager().await?;
        manager
            .set_property("WirelessEnabled", enabled)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn ethernet_connect(&self) -> Result<(), String> {
        let device = self.ethernet_device_path().await?;
        let manager = self.manager().await?;
        let empty: HashMap<&str, HashMap<&str, Value>> = HashMap::new();
        manager
            .call_method(
                "AddAndActivateConnection",
                &(empty, device, zbus::zvariant::ObjectPath::try_from("/").unwrap()),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn ethernet_disconnect(&self) -> Result<(), String> {
        let device = self.ethernet_device_path().await?;
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            device,
            "org.freedesktop.NetworkManager.Device",
        )
        .await
        .map_err(|e| e.to_string())?;
        proxy
            .call_method("Disconnect", &())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn ethernet_activate(&self, uuid: &str) -> Result<(), String> {
        let device = self.ethernet_device_path().await?;
        let manager = self.manager().await?;
        let settings = Proxy::new(
            &self.conn,
            BUS,
            "/org/freedesktop/NetworkManager/Settings",
            "org.freedesktop.NetworkManager.Settings",
        )
        .await
        .map_err(|e| e.to_string())?;
        let profile: zbus::zvariant::OwnedObjectPath = settings
            .call_method("GetConnectionByUuid", &(uuid,))
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        manager
            .call_method(
                "ActivateConnection",
                &(
                    profile,
                    device,
                    zbus::zvariant::ObjectPath::try_from("/").unwrap(),
                ),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn vpn_list(&self) -> Result<Vec<VpnProfile>, String> {
        let settings = Proxy::new(
            &self.conn,
            BUS,
            "/org/freedesktop/NetworkManager/Settings",
            "org.freedesktop.NetworkManager.Settings",
        )
        .await
        .map_err(|e| e.to_string())?;

        let profiles: Vec<zbus::zvariant::OwnedObjectPath> = settings
            .call_method("ListConnections", &())
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        for profile in profiles {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                profile.clone(),
                "org.freedesktop.NetworkManager.Settings.Connection",
            )
            .await
            .map_err(|e| e.to_string())?;
            let settings_map: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>> =
                match proxy.call_method("GetSettings", &()).await {
                    Ok(reply) => reply.body().deserialize().unwrap_or_default(),
                    Err(_) => continue,
                };

            let Some(conn_section) = settings_map.get("connection") else {
                continue;
            };
            let ctype = conn_section
                .get("type")
                .and_then(|v| v.downcast_ref::<String>().ok())
                .unwrap_or_default();
            if ctype != "vpn" {
                continue;
            }
            let id = conn_section
                .get("id")
                .and_then(|v| v.downcast_ref::<String>().ok())
                .unwrap_or_default();
            let uuid = conn_section
                .get("uuid")
                .and_then(|v| v.downcast_ref::<String>().ok())
                .unwrap_or_default();
            let service_type = settings_map
                .get("vpn")
                .and_then(|v| v.get("service-type"))
                .and_then(|v| v.downcast_ref::<String>().ok())
                .unwrap_or_default();

            out.push(VpnProfile {
                id: uuid,
                name: id,
                service_type,
            });
        }
        Ok(out)
    }

    pub async fn vpn_list_active(&self) -> Result<Vec<ActiveVpn>, String> {
        let manager = self.manager().await?;
        let actives: Vec<zbus::zvariant::OwnedObjectPath> = manager
            .get_property("ActiveConnections")
            .await
            .unwrap_or_default();

        let mut out = Vec::new();
        for path in actives {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                path.clone(),
                "org.freedesktop.NetworkManager.Connection.Active",
            )
            .await
            .map_err(|e| e.to_string())?;
            let ctype: String = proxy.get_property("Type").await.unwrap_or_default();
            if ctype != "vpn" {
                continue;
            }
            let id: String = proxy.get_property("Id").await.unwrap_or_default();
            let uuid: String = proxy.get_property("Uuid").await.unwrap_or_default();
            let nm_state: u32 = proxy.get_property("VpnState").await.unwrap_or(0);

            out.push(ActiveVpn {
                id: uuid,
                name: id,
                state: match nm_state {
                    4 => VpnConnectionState::Activating,
                    5 => VpnConnectionState::Activated,
                    6 | 7 => VpnConnectionState::Deactivating,
                    8 => VpnConnectionState::Deactivated,
                    _ => VpnConnectionState::Unknown,
                },
                banner: None,
            });
        }
        Ok(out)
    }

    pub async fn vpn_connect(&self, id: &str, single_active: bool) -> Result<(), String> {
        if single_active {
            self.vpn_disconnect_all().await?;
        }
        let manager = self.manager().await?;
        let settings = Proxy::new(
            &self.conn,
            BUS,
            "/org/freedesktop/NetworkManager/Settings",
            "org.freedesktop.NetworkManager.Settings",
        )
        .await
        .map_err(|e| e.to_string())?;
        let profile: zbus::zvariant::OwnedObjectPath = settings
            .call_method("GetConnectionByUuid", &(id,))
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        let no_device = zbus::zvariant::ObjectPath::try_from("/").unwrap();
        manager
            .call_method(
                "ActivateConnection",
                &(profile, no_device.clone(), no_device),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn vpn_disconnect(&self, id: &str) -> Result<(), String> {
        let manager = self.manager().await?;
        let actives: Vec<zbus::zvariant::OwnedObjectPath> = manager
            .get_property("ActiveConnections")
            .await
            .unwrap_or_default();

        for path in actives {
            let proxy = Proxy::new(
                &self.conn,
                BUS,
                path.clone(),
                "org.freedesktop.NetworkManager.Connection.Active",
            )
            .await
            .map_err(|e| e.to_string())?;
            let uuid: String = proxy.get_property("Uuid").await.unwrap_or_default();
            if uuid == id {
                manager
                    .call_method("DeactivateConnection", &(path,))
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(());
            }
        }
        Err(format!("vpn {id} is not active"))
    }

    pub async fn vpn_disconnect_all(&self) -> Result<(), String> {
        for active in self.vpn_list_active().await? {
            let _ = self.vpn_disconnect(&active.id).await;
        }
        Ok(())
    }

    pub async fn vpn_clear_credentials(&self, id: &str) -> Result<(), String> {
        let settings = Proxy::new(
            &self.conn,
            BUS,
            "/org/freedesktop/NetworkManager/Settings",
            "org.freedesktop.NetworkManager.Settings",
        )
        .await
        .map_err(|e| e.to_string())?;
        let profile: zbus::zvariant::OwnedObjectPath = settings
            .call_method("GetConnectionByUuid", &(id,))
            .await
            .map_err(|e| e.to_string())?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;
        let proxy = Proxy::new(
            &self.conn,
            BUS,
            profile,
            "org.freedesktop.NetworkManager.Settings.Connection",
        )
        .await
        .map_err(|e| e.to_string())?;
        let flags: u32 = 1; // CLEAR_SECRETS_WITH_FLAGS_ONLY_SYSTEM_SECRETS not applicable; clear all
        proxy
            .call_method("ClearSecrets", &(flags,))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
