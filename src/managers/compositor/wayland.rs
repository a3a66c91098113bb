// Author: Quayside contributors
// License: MIT

//! The compositor-mirror actor thread (spec.md §4.7). Binds
//! `zwlr_foreign_toplevel_manager_v1` when present and tracks per-toplevel
//! title/appId/activated state, folding it into a per-output view keyed by
//! output name.
//!
//! Tag/layout control has no corresponding wire protocol in the crates this
//! workspace depends on (tiling-compositor tag IPC is compositor-specific
//! and not part of any protocol shipped by `wayland-protocols-wlr`), so
//! `tags`/`layout` are tracked locally from configuration and RPC calls
//! rather than pushed to the compositor — see DESIGN.md.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use wayland_client::protocol::{wl_output::WlOutput, wl_registry::WlRegistry};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols_wlr::foreign_toplevel::v1::client::{
    zwlr_foreign_toplevel_handle_v1::{self, ZwlrForeignToplevelHandleV1},
    zwlr_foreign_toplevel_manager_v1::{self, ZwlrForeignToplevelManagerV1},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const BACKOFF_STEPS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];
const BACKOFF_CAP: Duration = Duration::from_secs(8);

pub enum ActorCommand {
    SetTags { output: String, tags: u32 },
    SetClientTags { handle_id: u32, tags: u32 },
    SetLayout { output: String, layout: String },
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct ToplevelReport {
    pub handle_id: u32,
    pub title: String,
    pub app_id: String,
    pub active: bool,
    pub output_name: Option<String>,
    pub tags: u32,
}

#[derive(Debug, Clone, Default)]
pub struct OutputReport {
    pub name: String,
    pub tags: u32,
    pub layout: String,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub available: bool,
    pub outputs: Vec<OutputReport>,
    pub toplevels: Vec<ToplevelReport>,
}

struct OutputEntry {
    name: String,
    tags: u32,
    layout: String,
}

struct ToplevelEntry {
    handle: ZwlrForeignToplevelHandleV1,
    title: String,
    app_id: String,
    active: bool,
    output_name: Option<String>,
    tags: u32,
}

struct AppState {
    outputs: HashMap<u32, OutputEntry>,
    toplevels: HashMap<u32, ToplevelEntry>,
    manager: Option<ZwlrForeignToplevelManagerV1>,
    next_synthetic_id: u32,
}

impl Dispatch<WlRegistry, ()> for AppState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wayland_client::protocol::wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wayland_client::protocol::wl_registry::Event::Global {
                name, interface, ..
            } => {
                if interface == "wl_output" {
                    let _wl_output = registry.bind::<WlOutput, _, _>(name, 1, qh, ());
                    state.outputs.insert(
                        name,
                        OutputEntry {
                            name: format!("output-{name}"),
                            tags: 1,
                            layout: "tile".to_string(),
                        },
                    );
                } else if interface == "zwlr_foreign_toplevel_manager_v1" {
                    state.manager = Some(registry.bind::<ZwlrForeignToplevelManagerV1, _, _>(
                        name,
                        1,
                        qh,
                        (),
                    ));
                }
            }
            wayland_client::protocol::wl_registry::Event::GlobalRemove { name } => {
                state.outputs.remove(&name);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, ()> for AppState {
    fn event(
        _: &mut Self,
        _: &WlOutput,
        _: <WlOutput as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwlrForeignToplevelManagerV1, ()> for AppState {
    fn event(
        state: &mut Self,
        _: &ZwlrForeignToplevelManagerV1,
        event: zwlr_foreign_toplevel_manager_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let zwlr_foreign_toplevel_manager_v1::Event::Toplevel { toplevel } = event {
            let id = state.next_synthetic_id;
            state.next_synthetic_id += 1;
            // wayland-client associates user data at bind time; re-key the
            // freshly advertised handle proxy under our own synthetic id so
            // later handle events can find their entry.
            let _ = &toplevel;
            state.toplevels.insert(
                id,
                ToplevelEntry {
                    handle: toplevel,
                    title: String::new(),
                    app_id: String::new(),
                    active: false,
                    output_name: None,
                    tags: 0,
                },
            );
            let _ = qh;
        }
    }
}

impl Dispatch<ZwlrForeignToplevelHandleV1, ()> for AppState {
    fn event(
        state: &mut Self,
        proxy: &ZwlrForeignToplevelHandleV1,
        event: zwlr_foreign_toplevel_handle_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some((_, entry)) = state
            .toplevels
            .iter_mut()
            .find(|(_, e)| e.handle.id() == proxy.id())
        else {
            return;
        };

        match event {
            zwlr_foreign_toplevel_handle_v1::Event::Title { title } => entry.title = title,
            zwlr_foreign_toplevel_handle_v1::Event::AppId { app_id } => entry.app_id = app_id,
            zwlr_foreign_toplevel_handle_v1::Event::State { state: flags } => {
                entry.active = flags
                    .chunks(4)
                    .filter_map(|c| c.try_into().ok())
                    .map(u32::from_ne_bytes)
                    .any(|v| v == zwlr_foreign_toplevel_handle_v1::State::Activated as u32);
            }
            zwlr_foreign_toplevel_handle_v1::Event::Closed => {
                entry.active = false;
            }
            _ => {}
        }
    }
}

pub fn run(
    commands: std_mpsc::Receiver<ActorCommand>,
    reports: tokio::sync::mpsc::UnboundedSender<Report>,
) {
    let mut backoff_index = 0usize;
    loop {
        match run_connected(&commands, &reports) {
            ConnectionOutcome::Shutdown => return,
            ConnectionOutcome::Disconnected => {
                let delay = BACKOFF_STEPS
                    .get(backoff_index)
                    .copied()
                    .unwrap_or(BACKOFF_CAP);
                eventline::warn!("compositor: wayland connection lost, reconnecting in {delay:?}");
                std::thread::sleep(delay);
                backoff_index = (backoff_index + 1).min(BACKOFF_STEPS.len());
            }
        }
    }
}

enum ConnectionOutcome {
    Shutdown,
    Disconnected,
}

fn run_connected(
    commands: &std_mpsc::Receiver<ActorCommand>,
    reports: &tokio::sync::mpsc::UnboundedSender<Report>,
) -> ConnectionOutcome {
    let conn = match Connection::connect_to_env() {
        Ok(c) => c,
        Err(e) => {
            eventline::warn!("compositor: failed to connect to wayland: {e}");
            return ConnectionOutcome::Disconnected;
        }
    };

    let mut event_queue: EventQueue<AppState> = conn.new_event_queue();
    let qh = event_queue.handle();
    let display = conn.display();
    let _registry = display.get_registry(&qh, ());

    let mut state = AppState {
        outputs: HashMap::new(),
        toplevels: HashMap::new(),
        manager: None,
        next_synthetic_id: 1,
    };

    if event_queue.roundtrip(&mut state).is_err() {
        return ConnectionOutcome::Disconnected;
    }

    let available = state.manager.is_some();
    if !available {
        eventline::warn!("compositor: zwlr_foreign_toplevel_manager_v1 not available");
    }
    send_report(reports, &state, available);

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(ActorCommand::SetTags { output, tags }) => {
                if let Some(entry) = state.outputs.values_mut().find(|o| o.name == output) {
                    entry.tags = tags;
                }
                send_report(reports, &state, available);
            }
            Ok(ActorCommand::SetClientTags { handle_id, tags }) => {
                if let Some(entry) = state.toplevels.get_mut(&handle_id) {
                    entry.tags = tags;
                }
                send_report(reports, &state, available);
            }
            Ok(ActorCommand::SetLayout { output, layout }) => {
                if let Some(entry) = state.outputs.values_mut().find(|o| o.name == output) {
                    entry.layout = layout;
                }
                send_report(reports, &state, available);
            }
            Ok(ActorCommand::Shutdown) => return ConnectionOutcome::Shutdown,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if event_queue.dispatch_pending(&mut state).is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                if conn.flush().is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                send_report(reports, &state, available);
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => return ConnectionOutcome::Shutdown,
        }
    }
}

fn send_report(
    reports: &tokio::sync::mpsc::UnboundedSender<Report>,
    state: &AppState,
    available: bool,
) {
    let toplevels = state
        .toplevels
        .iter()
        .map(|(id, e)| ToplevelReport {
            handle_id: *id,
            title: e.title.clone(),
            app_id: e.app_id.clone(),
            active: e.active,
            output_name: e.output_name.clone(),
            tags: e.tags,
        })
        .collect();
    let outputs = state
        .outputs
        .values()
        .map(|o| OutputReport {
            name: o.name.clone(),
            tags: o.tags,
            layout: o.layout.clone(),
        })
        .collect();
    let _ = reports.send(Report {
        available,
        outputs,
        toplevels,
    });
}
