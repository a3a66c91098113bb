// Author: Quayside contributors
// License: MIT

//! logind signal plumbing for the session controller (spec.md §4.3 "Signals
//! consumed"), grounded in the same `Proxy`/`MatchRule` idiom used
//! elsewhere for suspend/lid/lock listening.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use zbus::{zvariant::OwnedValue, Connection, MatchRule, Proxy};

#[derive(Debug, Clone)]
pub enum LoginEvent {
    PrepareForSleep(bool),
    Lock,
    Unlock,
    PropertiesChanged {
        active: Option<bool>,
        idle_hint: Option<bool>,
        idle_since_hint: Option<u64>,
        locked_hint: Option<bool>,
    },
    NameOwnerChanged {
        old_owner: String,
        new_owner: String,
    },
}

pub async fn current_session_path(
    conn: &Connection,
) -> Result<zbus::zvariant::OwnedObjectPath, String> {
    let manager = Proxy::new(
        conn,
        "org.freedesktop.login1",
        "/org/freedesktop/login1",
        "org.freedesktop.login1.Manager",
    )
    .await
    .map_err(|e| e.to_string())?;

    if let Ok(session_id) = std::env::var("XDG_SESSION_ID") {
        if let Ok(path) = manager
            .call_method("GetSession", &(session_id.as_str(),))
            .await
            .and_then(|reply| reply.body().deserialize::<zbus::zvariant::OwnedObjectPath>())
        {
            return Ok(path);
        }
    }

    let pid = std::process::id();
    manager
        .call_method("GetSessionByPID", &(pid,))
        .await
        .map_err(|e| e.to_string())?
        .body()
        .deserialize()
        .map_err(|e| e.to_string())
}

/// Spawn one task per signal source, all feeding `tx`. Tasks exit when the
/// underlying stream ends (bus connection dropped at shutdown).
pub fn spawn_listeners(
    conn: Connection,
    session_path: zbus::zvariant::OwnedObjectPath,
    tx: mpsc::Sender<LoginEvent>,
) {
    spawn_prepare_for_sleep(conn.clone(), tx.clone());
    spawn_lock_unlock(conn.clone(), session_path.clone(), tx.clone());
    spawn_properties_changed(conn.clone(), session_path, tx.clone());
    spawn_name_owner_changed(conn, tx);
}

fn spawn_prepare_for_sleep(conn: Connection, tx: mpsc::Sender<LoginEvent>) {
    tokio::spawn(async move {
        let proxy = match Proxy::new(
            &conn,
            "org.freedesktop.login1",
            "/org/freedesktop/login1",
            "org.freedesktop.login1.Manager",
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                eventline::warn!("login: failed to watch PrepareForSleep: {e}");
                return;
            }
        };
        let Ok(mut stream) = proxy.receive_signal("PrepareForSleep").await else {
            eventline::warn!("login: failed to subscribe to PrepareForSleep");
            return;
        };
        while let Some(signal) = stream.next().await {
            if let Ok(going_to_sleep) = signal.body().deserialize::<bool>() {
                let _ = tx.send(LoginEvent::PrepareForSleep(going_to_sleep)).await;
            }
        }
    });
}

fn spawn_lock_unlock(
    conn: Connection,
    session_path: zbus::zvariant::OwnedObjectPath,
    tx: mpsc::Sender<LoginEvent>,
) {
    tokio::spawn(async move {
        let proxy = match Proxy::new(
            &conn,
            "org.freedesktop.login1",
            session_path,
            "org.freedesktop.login1.Session",
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                eventline::warn!("login: failed to watch Lock/Unlock: {e}");
                return;
            }
        };

        let Ok(mut lock_stream) = proxy.receive_signal("Lock").await else {
            return;
        };
        let Ok(mut unlock_stream) = proxy.receive_signal("Unlock").await else {
            return;
        };

        loop {
            tokio::select! {
                sig = lock_stream.next() => {
                    if sig.is_none() { break; }
                    let _ = tx.send(LoginEvent::Lock).await;
                }
                sig = unlock_stream.next() => {
                    if sig.is_none() { break; }
                    let _ = tx.send(LoginEvent::Unlock).await;
                }
            }
        }
    });
}

fn spawn_properties_changed(
    conn: Connection,
    session_path: zbus::zvariant::OwnedObjectPath,
    tx: mpsc::Sender<LoginEvent>,
) {
    tokio::spawn(async move {
        let rule = match MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface("org.freedesktop.DBus.Properties")
            .and_then(|b| b.member("PropertiesChanged"))
            .and_then(|b| b.path(session_path.as_ref()))
        {
            Ok(b) => b.build(),
            Err(e) => {
                eventline::warn!("login: failed to build PropertiesChanged match rule: {e}");
                return;
            }
        };

        let Ok(mut stream) = zbus::MessageStream::for_match_rule(rule, &conn, None).await else {
            eventline::warn!("login: failed to subscribe to session PropertiesChanged");
            return;
        };

        while let Some(msg) = stream.next().await {
            let Ok(msg) = msg else { continue };
            let body = msg.body();
            let Ok((iface, changed, _)): Result<(String, HashMap<String, OwnedValue>, Vec<String>), _> =
                body.deserialize()
            else {
                continue;
            };
            if iface != "org.freedesktop.login1.Session" {
                continue;
            }

            let active = changed
                .get("Active")
                .and_then(|v| v.downcast_ref::<bool>().ok());
            let idle_hint = changed
                .get("IdleHint")
                .and_then(|v| v.downcast_ref::<bool>().ok());
            let idle_since_hint = changed
                .get("IdleSinceHint")
                .and_then(|v| v.downcast_ref::<u64>().ok());
            let locked_hint = changed
                .get("LockedHint")
                .and_then(|v| v.downcast_ref::<bool>().ok());

            if active.is_none() && idle_hint.is_none() && idle_since_hint.is_none() && locked_hint.is_none() {
                continue;
            }

            let _ = tx
                .send(LoginEvent::PropertiesChanged {
                    active,
                    idle_hint,
                    idle_since_hint,
                    locked_hint,
                })
                .await;
        }
    });
}

fn spawn_name_owner_changed(conn: Connection, tx: mpsc::Sender<LoginEvent>) {
    tokio::spawn(async move {
        let dbus = match Proxy::new(
            &conn,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                eventline::warn!("login: failed to watch NameOwnerChanged: {e}");
                return;
            }
        };
        let Ok(mut stream) = dbus.receive_signal("NameOwnerChanged").await else {
            return;
        };
        while let Some(signal) = stream.next().await {
            let Ok((name, old_owner, new_owner)): Result<(String, String, String), _> =
                signal.body().deserialize()
            else {
                continue;
            };
            if name != "org.freedesktop.login1" {
                continue;
            }
            if !old_owner.is_empty() && !new_owner.is_empty() {
                let _ = tx
                    .send(LoginEvent::NameOwnerChanged { old_owner, new_owner })
                    .await;
            }
        }
    });
}
