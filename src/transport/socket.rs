// Author: Quayside contributors
// License: MIT

//! Socket path resolution and stale-sibling sweeping (spec.md §6: path
//! `${runtime_dir}/${name}-${pid}.sock`; "On startup the component scans
//! its directory for siblings whose pid is no longer live (signal-0
//! probe) and removes their sockets").

use std::path::{Path, PathBuf};

/// `${runtime_dir}/${name}-${pid}.sock`. `runtime_dir` is `XDG_RUNTIME_DIR`
/// if set, else a per-user tmp fallback.
pub fn resolve_path(name: &str) -> PathBuf {
    runtime_dir().join(format!("{name}-{}.sock", std::process::id()))
}

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(|| {
        let uid = unsafe { libc::getuid() };
        std::env::temp_dir().join(format!("quayside-{uid}"))
    })
}

/// Scan `${runtime_dir}` for `${name}-<pid>.sock` entries whose pid no
/// longer answers a signal-0 probe, and remove them. `own_path` is never
/// touched even if, somehow, it already exists (the caller removes it
/// itself right before binding).
pub fn sweep_stale(name: &str, own_path: &Path) {
    let dir = match own_path.parent() {
        Some(d) => d,
        None => return,
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    let prefix = format!("{name}-");
    for entry in entries.flatten() {
        let path = entry.path();
        if path == own_path {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(pid_str) = rest.strip_suffix(".sock") else {
            continue;
        };
        let Ok(pid) = pid_str.parse::<i32>() else {
            continue;
        };

        if !pid_is_live(pid) {
            eventline::debug!("transport: removing stale socket {}", path.display());
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// `kill(pid, 0)`: succeeds iff the process exists and is visible to us.
fn pid_is_live(pid: i32) -> bool {
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0
}
