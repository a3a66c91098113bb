// Author: Quayside contributors
// License: MIT

//! The freedesktop accounts/portal read-write shim (spec.md §2 item 8
//! "FreedeskBridge", §6 `freedesktop.*`).

pub mod state;

use zbus::{Connection, Proxy};

use state::AccountInfo;

const ACCOUNTS_BUS: &str = "org.freedesktop.Accounts";
const ACCOUNTS_MANAGER_PATH: &str = "/org/freedesktop/Accounts";
const ACCOUNTS_MANAGER_IFACE: &str = "org.freedesktop.Accounts";
const ACCOUNTS_USER_IFACE: &str = "org.freedesktop.Accounts.User";

const PORTAL_BUS: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const SETTINGS_IFACE: &str = "org.freedesktop.portal.Settings";

/// Read/write shim over the accounts service and desktop settings portal.
/// Unlike the other managers this one holds no cached state: every call
/// round-trips the bus directly, since accounts/settings values are read
/// rarely and change out from under the session without a signal this
/// bridge subscribes to.
pub struct FreedeskBridge {
    conn: Connection,
}

impl FreedeskBridge {
    pub async fn connect() -> Result<Self, String> {
        let conn = Connection::system()
            .await
            .map_err(|e| format!("failed to connect to system bus: {e}"))?;
        Ok(Self { conn })
    }

    async fn find_user_path(&self, user_name: &str) -> Result<zbus::zvariant::OwnedObjectPath, String> {
        let manager = Proxy::new(
            &self.conn,
            ACCOUNTS_BUS,
            ACCOUNTS_MANAGER_PATH,
            ACCOUNTS_MANAGER_IFACE,
        )
        .await
        .map_err(|e| e.to_string())?;

        let path: zbus::zvariant::OwnedObjectPath = manager
            .call_method("FindUserByName", &(user_name,))
            .await
            .map_err(|e| format!("unknown account {user_name}: {e}"))?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;
        Ok(path)
    }

    pub async fn get_account(&self, user_name: &str) -> Result<AccountInfo, String> {
        let path = self.find_user_path(user_name).await?;
        let user = Proxy::new(&self.conn, ACCOUNTS_BUS, path, ACCOUNTS_USER_IFACE)
            .await
            .map_err(|e| e.to_string())?;

        Ok(AccountInfo {
            user_name: user
                .get_property("UserName")
                .await
                .unwrap_or_else(|_| user_name.to_string()),
            real_name: user.get_property("RealName").await.unwrap_or_default(),
            icon_file: user.get_property("IconFile").await.unwrap_or_default(),
            email: user.get_property("Email").await.unwrap_or_default(),
            language: user.get_property("Language").await.unwrap_or_default(),
        })
    }

    /// Writes a single account property. `field` must be one of
    /// `real_name`, `icon_file`, `email`, `language` — each maps onto the
    /// corresponding `Set*` method on `org.freedesktop.Accounts.User`.
    pub async fn set_account(&self, user_name: &str, field: &str, value: &str) -> Result<(), String> {
        let path = self.find_user_path(user_name).await?;
        let user = Proxy::new(&self.conn, ACCOUNTS_BUS, path, ACCOUNTS_USER_IFACE)
            .await
            .map_err(|e| e.to_string())?;

        let method = match field {
            "real_name" => "SetRealName",
            "icon_file" => "SetIconFile",
            "email" => "SetEmail",
            "language" => "SetLanguage",
            other => return Err(format!("unsupported account field: {other}")),
        };

        user.call_method(method, &(value,))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn get_setting(&self, namespace: &str, key: &str) -> Result<String, String> {
        let portal = Proxy::new(&self.conn, PORTAL_BUS, PORTAL_PATH, SETTINGS_IFACE)
            .await
            .map_err(|e| e.to_string())?;

        let value: zbus::zvariant::OwnedValue = portal
            .call_method("Read", &(namespace, key))
            .await
            .map_err(|e| format!("failed to read {namespace}.{key}: {e}"))?
            .body()
            .deserialize()
            .map_err(|e| e.to_string())?;

        Ok(format!("{value:?}"))
    }

    /// The settings portal exposes no generic write method (it is
    /// read/subscribe-only by design); writes go to whichever XDG config
    /// file backs the namespace, which is out of scope for this bridge —
    /// callers should use `set_account` for the one writable surface this
    /// daemon actually owns.
    pub async fn set_setting(&self, namespace: &str, key: &str, _value: &str) -> Result<(), String> {
        Err(format!(
            "org.freedesktop.portal.Settings has no write method ({namespace}.{key})"
        ))
    }
}
