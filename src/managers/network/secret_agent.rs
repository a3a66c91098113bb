// Author: Quayside contributors
// License: MIT

//! The 802.1X/PSK secret agent (spec.md §4.4 "Secret agent").
//!
//! Registers under a stable well-known identifier with the full-featured
//! backend and answers `GetSecrets` by bridging into the shared
//! [`PromptBroker`], returning either the supplied secrets or a `NoSecrets`
//! error when interaction was not warranted.

use std::collections::HashMap;
use std::sync::Arc;

use zbus::{interface, zvariant::Value, Connection};

use crate::managers::prompt_broker::{PromptBroker, PromptReason, PromptRequest};

const AGENT_IDENTIFIER: &str = "rs.quayside.NetworkSecretAgent";

pub struct SecretAgent {
    broker: Arc<PromptBroker>,
}

#[interface(name = "org.freedesktop.NetworkManager.SecretAgent")]
impl SecretAgent {
    #[zbus(name = "GetSecrets")]
    async fn get_secrets(
        &self,
        connection: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>,
        connection_path: zbus::zvariant::ObjectPath<'_>,
        setting_name: String,
        hints: Vec<String>,
        flags: u32,
        #[zbus(connection)] zbus_connection: &Connection,
    ) -> zbus::fdo::Result<HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>> {
        const ALLOW_INTERACTION: u32 = 0x1;
        const REQUEST_NEW: u32 = 0x2;

        let conn_section = connection.get("connection");
        let connection_id = conn_section
            .and_then(|s| s.get("id"))
            .and_then(|v| v.downcast_ref::<String>().ok());
        let connection_uuid = conn_section
            .and_then(|s| s.get("uuid"))
            .and_then(|v| v.downcast_ref::<String>().ok());
        let ssid = connection
            .get("802-11-wireless")
            .and_then(|s| s.get("ssid"))
            .and_then(|v| v.downcast_ref::<Vec<u8>>().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        if hints.is_empty() && flags & REQUEST_NEW == 0 {
            // No hints and not an explicit re-prompt: check *-flags for a
            // non-required or agent-owned secret before bothering the user.
            if let Some(setting) = connection.get(&setting_name) {
                let flags_key = format!("{setting_name}-flags");
                let psk_flags = setting
                    .get("psk-flags")
                    .or_else(|| setting.get(&flags_key))
                    .and_then(|v| v.downcast_ref::<u32>().ok())
                    .unwrap_or(0);
                const NOT_REQUIRED: u32 = 0x4;
                const AGENT_OWNED: u32 = 0x2;
                if psk_flags & NOT_REQUIRED != 0 {
                    return Ok(HashMap::new());
                }
                if psk_flags & AGENT_OWNED != 0 {
                    return Err(zbus::fdo::Error::Failed("NoSecrets".into()));
                }
            }
        }

        if flags & ALLOW_INTERACTION == 0 {
            return Err(zbus::fdo::Error::Failed("NoSecrets".into()));
        }

        let reason = if flags & REQUEST_NEW != 0 {
            PromptReason::WrongPassword
        } else {
            PromptReason::Required
        };

        let required_fields = if hints.is_empty() {
            vec!["psk".to_string()]
        } else {
            hints
        };

        let request = PromptRequest {
            token: String::new(),
            ssid,
            connection_type: setting_name.clone(),
            vpn_service_id: None,
            setting_name: setting_name.clone(),
            required_fields,
            hints: Vec::new(),
            reason,
            connection_id,
            connection_uuid,
        };

        let token = self.broker.ask(request).await;
        let reply = self
            .broker
            .wait(&token)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        if reply.secrets.is_empty() {
            return Err(zbus::fdo::Error::Failed("NoSecrets".into()));
        }

        if reply.save {
            if let Err(e) = save_secrets_back(
                zbus_connection,
                &connection_path,
                &connection,
                &setting_name,
                &reply.secrets,
            )
            .await
            {
                eventline::warn!("network: failed to save secrets back to profile: {e}");
            }
        }

        let mut secrets_variant: HashMap<String, zbus::zvariant::OwnedValue> = HashMap::new();
        for (field, value) in &reply.secrets {
            let owned: zbus::zvariant::OwnedValue = Value::new(value.clone())
                .try_to_owned()
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
            secrets_variant.insert(field.clone(), owned);
        }

        let mut out = HashMap::new();
        out.insert(setting_name, secrets_variant);
        Ok(out)
    }

    #[zbus(name = "CancelGetSecrets")]
    async fn cancel_get_secrets(
        &self,
        _connection_path: zbus::zvariant::ObjectPath<'_>,
        _setting_name: String,
    ) {
        // Best-effort: the in-flight `wait` will itself time out at 120s if
        // the user never responds; NetworkManager does not give us enough
        // context here to map back to a specific token.
    }

    #[zbus(name = "SaveSecrets")]
    async fn save_secrets(
        &self,
        _connection: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>,
        _connection_path: zbus::zvariant::ObjectPath<'_>,
    ) {
    }

    #[zbus(name = "DeleteSecrets")]
    async fn delete_secrets(
        &self,
        _connection: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>,
        _connection_path: zbus::zvariant::ObjectPath<'_>,
    ) {
    }
}

/// Write the secrets the user chose to save back into the stored connection
/// profile, zeroing each field's `*-flags` so NetworkManager stops asking,
/// and stripping the transient `ipv4`/`ipv6` sections so a one-off lease
/// from the current activation doesn't get carried into the saved profile
/// (spec.md §4.4 "Secret agent": "if the user chose 'save', write the
/// supplied fields back into the stored profile ... with `*-flags = 0`,
/// and strip transient IP data").
async fn save_secrets_back(
    conn: &Connection,
    connection_path: &zbus::zvariant::ObjectPath<'_>,
    original: &HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>,
    setting_name: &str,
    secrets: &HashMap<String, String>,
) -> Result<(), String> {
    let mut updated = original.clone();
    let setting = updated.entry(setting_name.to_string()).or_default();

    for (field, value) in secrets {
        let owned: zbus::zvariant::OwnedValue = Value::new(value.clone())
            .try_to_owned()
            .map_err(|e| e.to_string())?;
        setting.insert(field.clone(), owned);

        let flags_owned: zbus::zvariant::OwnedValue = Value::new(0u32)
            .try_to_owned()
            .map_err(|e| e.to_string())?;
        setting.insert(format!("{field}-flags"), flags_owned);
    }

    updated.remove("ipv4");
    updated.remove("ipv6");

    let proxy = zbus::Proxy::new(
        conn,
        "org.freedesktop.NetworkManager",
        connection_path.clone(),
        "org.freedesktop.NetworkManager.Settings.Connection",
    )
    .await
    .map_err(|e| e.to_string())?;

    proxy
        .call_method("Update", &(updated,))
        .await
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Register the agent on the system bus under the well-known identifier and
/// return the live connection that must be kept alive for as long as the
/// agent should remain registered.
pub async fn register(broker: Arc<PromptBroker>) -> Result<Connection, String> {
    let conn = Connection::system().await.map_err(|e| e.to_string())?;
    conn.object_server()
        .at(
            "/org/freedesktop/NetworkManager/SecretAgent",
            SecretAgent { broker },
        )
        .await
        .map_err(|e| e.to_string())?;

    let manager = zbus::Proxy::new(
        &conn,
        "org.freedesktop.NetworkManager",
        "/org/freedesktop/NetworkManager/AgentManager",
        "org.freedesktop.NetworkManager.AgentManager",
    )
    .await
    .map_err(|e| e.to_string())?;

    manager
        .call_method("Register", &(AGENT_IDENTIFIER,))
        .await
        .map_err(|e| e.to_string())?;

    eventline::info!("network: secret agent registered as {AGENT_IDENTIFIER}");
    Ok(conn)
}
