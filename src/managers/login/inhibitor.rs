// Author: Quayside contributors
// License: MIT

//! Delay-style sleep inhibitor acquisition (spec.md §4.3 "Inhibitor
//! protocol"). A held inhibitor is a `close`-on-drop file descriptor; there
//! is never more than one live at a time (spec.md §8 invariant 5).

use std::os::fd::OwnedFd;

use zbus::Connection;

const WHAT: &str = "sleep";
const WHO: &str = "quayside";
const WHY: &str = "lock before suspend";
const MODE: &str = "delay";

/// Take a fresh delay inhibitor. Returns `None` (with a warning already
/// logged) if acquisition fails — per spec.md §4.3 this is non-fatal.
pub async fn acquire(conn: &Connection) -> Option<OwnedFd> {
    let proxy = match zbus::Proxy::new(
        conn,
        "org.freedesktop.login1",
        "/org/freedesktop/login1",
        "org.freedesktop.login1.Manager",
    )
    .await
    {
        Ok(p) => p,
        Err(e) => {
            eventline::warn!("login: failed to build manager proxy for inhibitor: {e}");
            return None;
        }
    };

    match proxy
        .call_method("Inhibit", &(WHAT, WHO, WHY, MODE))
        .await
    {
        Ok(reply) => match reply.body().deserialize::<zbus::zvariant::OwnedFd>() {
            Ok(fd) => Some(fd.into()),
            Err(e) => {
                eventline::warn!("login: failed to decode inhibitor fd: {e}");
                None
            }
        },
        Err(e) => {
            eventline::warn!("login: failed to acquire sleep inhibitor: {e}");
            None
        }
    }
}
