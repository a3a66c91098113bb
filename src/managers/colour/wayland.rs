// Author: Quayside contributors
// License: MIT

//! The single Wayland actor thread (spec.md §4.6 "Serialisation",
//! "Disconnect recovery"). Every `ZwlrGammaControlV1` call happens here;
//! callers communicate exclusively through [`ActorCommand`]s.
//!
//! The event-dispatch and command-consuming loops are combined into one
//! thread rather than split across two, following the same
//! recv-with-timeout shape the reference night-mode implementation uses:
//! correctness of "all gamma calls happen on one thread" does not require a
//! second thread, only that reactions to compositor events do not block
//! behind an unbounded queue.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use wayland_client::protocol::{wl_output::WlOutput, wl_registry::WlRegistry};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols_wlr::gamma_control::v1::client::{
    zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1,
    zwlr_gamma_control_v1::{self, ZwlrGammaControlV1},
};

use super::ramp;

const RECREATE_DELAY: Duration = Duration::from_millis(300);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const BACKOFF_STEPS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];
const BACKOFF_CAP: Duration = Duration::from_secs(8);

pub enum ActorCommand {
    /// Apply this Kelvin temperature to every ready output immediately.
    ApplyTemperature(f64, f64), // (kelvin, gamma)
    /// Turn the gamma pipeline on (create a control per known output) or
    /// off (destroy every control and mark uninitialised) (spec.md §4.6
    /// "Disabling" / "Per-output lifecycle").
    SetEnabled(bool),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct OutputReport {
    pub name: String,
    pub ready: bool,
    pub failed: bool,
}

/// Status batch handed back to the async controller after every actor
/// action: per-output readiness plus whether gamma controls currently exist
/// at all (spec.md §3 OutputControl, §4.6 "mark controls as uninitialised").
#[derive(Debug, Clone)]
pub struct ColourReport {
    pub outputs: Vec<OutputReport>,
    pub controls_initialized: bool,
}

struct OutputEntry {
    wl_output: WlOutput,
    name: String,
    control: Option<ZwlrGammaControlV1>,
    size: Option<u32>,
    failed: bool,
    recreate_at: Option<Instant>,
    /// Kept alive only so the compositor can still read it; replaced on
    /// every apply.
    _shm_fd: Option<std::os::fd::OwnedFd>,
}

struct AppState {
    outputs: HashMap<u32, OutputEntry>,
    gamma_manager: Option<ZwlrGammaControlManagerV1>,
    enabled: bool,
    current_gamma: f64,
    current_temp: f64,
    controls_initialized: bool,
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
                name,
                interface,
                ..
            } => {
                if interface == "wl_output" {
                    let wl_output = registry.bind::<WlOutput, _, _>(name, 1, qh, ());
                    let control = if state.enabled {
                        state
                            .gamma_manager
                            .as_ref()
                            .map(|m| m.get_gamma_control(&wl_output, qh, name))
                    } else {
                        None
                    };
                    if control.is_some() {
                        // Hotplug add while enabled and already initialised
                        // (spec.md §4.6 "On hotplug add, if enabled and
                        // initialized, create a fresh control immediately").
                        state.controls_initialized = true;
                    }
                    state.outputs.insert(
                        name,
                        OutputEntry {
                            wl_output,
                            name: format!("output-{name}"),
                            control,
                            size: None,
                            failed: false,
                            recreate_at: None,
                            _shm_fd: None,
                        },
                    );
                } else if interface == "zwlr_gamma_control_manager_v1" {
                    state.gamma_manager =
                        Some(registry.bind::<ZwlrGammaControlManagerV1, _, _>(name, 1, qh, ()));
                }
            }
            wayland_client::protocol::wl_registry::Event::GlobalRemove { name } => {
                if let Some(entry) = state.outputs.remove(&name) {
                    if let Some(control) = entry.control {
                        control.destroy();
                    }
                }
                if state.outputs.is_empty() {
                    // spec.md §4.6 "when the last output is gone, mark
                    // controls as uninitialised".
                    state.controls_initialized = false;
                }
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

impl Dispatch<ZwlrGammaControlManagerV1, ()> for AppState {
    fn event(
        _: &mut Self,
        _: &ZwlrGammaControlManagerV1,
        _: <ZwlrGammaControlManagerV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwlrGammaControlV1, u32> for AppState {
    fn event(
        state: &mut Self,
        _proxy: &ZwlrGammaControlV1,
        event: zwlr_gamma_control_v1::Event,
        registry_name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_gamma_control_v1::Event::GammaSize { size } => {
                if let Some(entry) = state.outputs.get_mut(registry_name) {
                    entry.size = Some(size);
                }
            }
            zwlr_gamma_control_v1::Event::Failed => {
                if let Some(entry) = state.outputs.get_mut(registry_name) {
                    eventline::warn!("colour: gamma control failed for {}", entry.name);
                    entry.failed = true;
                    entry.control = None;
                    entry.recreate_at = Some(Instant::now() + RECREATE_DELAY);
                }
            }
            _ => {}
        }
    }
}

/// Entry point run on the dedicated actor thread. `commands` feeds target
/// temperature updates in; `reports` carries per-output status back out for
/// the async controller to fold into its published snapshot.
pub fn run(
    commands: std_mpsc::Receiver<ActorCommand>,
    reports: tokio::sync::mpsc::UnboundedSender<ColourReport>,
    initial_temp: f64,
    gamma: f64,
    enabled: bool,
) {
    let mut backoff_index = 0usize;

    loop {
        match run_connected(&commands, &reports, initial_temp, gamma, enabled) {
            ConnectionOutcome::Shutdown => return,
            ConnectionOutcome::Disconnected => {
                let delay = BACKOFF_STEPS
                    .get(backoff_index)
                    .copied()
                    .unwrap_or(BACKOFF_CAP);
                eventline::warn!("colour: wayland connection lost, reconnecting in {delay:?}");
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
    reports: &tokio::sync::mpsc::UnboundedSender<ColourReport>,
    mut temp: f64,
    mut gamma: f64,
    enabled: bool,
) -> ConnectionOutcome {
    let conn = match Connection::connect_to_env() {
        Ok(c) => c,
        Err(e) => {
            eventline::warn!("colour: failed to connect to wayland: {e}");
            return ConnectionOutcome::Disconnected;
        }
    };

    let mut event_queue: EventQueue<AppState> = conn.new_event_queue();
    let qh = event_queue.handle();
    let display = conn.display();
    let _registry = display.get_registry(&qh, ());

    let mut state = AppState {
        outputs: HashMap::new(),
        gamma_manager: None,
        enabled,
        current_gamma: gamma,
        current_temp: temp,
        controls_initialized: enabled,
    };

    if event_queue.roundtrip(&mut state).is_err() {
        return ConnectionOutcome::Disconnected;
    }

    if state.gamma_manager.is_none() {
        eventline::error!("colour: zwlr_gamma_control_manager_v1 not available");
        return ConnectionOutcome::Disconnected;
    }

    if event_queue.roundtrip(&mut state).is_err() {
        return ConnectionOutcome::Disconnected;
    }

    apply_to_all(&mut state, temp, gamma);
    let _ = event_queue.roundtrip(&mut state);
    send_reports(reports, &state);

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(ActorCommand::ApplyTemperature(new_temp, new_gamma)) => {
                temp = new_temp;
                gamma = new_gamma;
                state.current_temp = temp;
                state.current_gamma = gamma;
                apply_to_all(&mut state, temp, gamma);
                if event_queue.roundtrip(&mut state).is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                send_reports(reports, &state);
            }
            Ok(ActorCommand::SetEnabled(enable)) => {
                state.enabled = enable;
                if enable {
                    if let Some(manager) = state.gamma_manager.clone() {
                        for (name, entry) in state.outputs.iter_mut() {
                            if entry.control.is_none() {
                                entry.control =
                                    Some(manager.get_gamma_control(&entry.wl_output, &qh, *name));
                                entry.failed = false;
                                entry.recreate_at = None;
                            }
                        }
                    }
                    state.controls_initialized = true;
                    apply_to_all(&mut state, temp, gamma);
                } else {
                    for entry in state.outputs.values_mut() {
                        if let Some(control) = entry.control.take() {
                            control.destroy();
                        }
                        entry.size = None;
                        entry.failed = false;
                        entry.recreate_at = None;
                        entry._shm_fd = None;
                    }
                    state.controls_initialized = false;
                }
                if event_queue.roundtrip(&mut state).is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                send_reports(reports, &state);
            }
            Ok(ActorCommand::Shutdown) => {
                for entry in state.outputs.values() {
                    if let Some(control) = &entry.control {
                        control.destroy();
                    }
                }
                let _ = event_queue.roundtrip(&mut state);
                return ConnectionOutcome::Shutdown;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if event_queue.dispatch_pending(&mut state).is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                if conn.flush().is_err() {
                    return ConnectionOutcome::Disconnected;
                }
                recreate_failed(&mut state, &qh);
                send_reports(reports, &state);
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                return ConnectionOutcome::Shutdown;
            }
        }
    }
}

fn recreate_failed(state: &mut AppState, qh: &QueueHandle<AppState>) {
    if !state.enabled {
        return;
    }
    let Some(manager) = state.gamma_manager.clone() else {
        return;
    };
    let now = Instant::now();
    let due: Vec<u32> = state
        .outputs
        .iter()
        .filter(|(_, e)| e.failed && e.recreate_at.is_some_and(|t| now >= t))
        .map(|(name, _)| *name)
        .collect();

    for name in due {
        if let Some(entry) = state.outputs.get_mut(&name) {
            entry.control = Some(manager.get_gamma_control(&entry.wl_output, qh, name));
            entry.failed = false;
            entry.recreate_at = None;
        }
    }
}

fn apply_to_all(state: &mut AppState, temp: f64, gamma: f64) {
    for entry in state.outputs.values_mut() {
        let Some(control) = &entry.control else { continue };
        let Some(size) = entry.size else { continue };

        let (r, g, b) = ramp::build_ramp(size as usize, temp, gamma);
        match ramp::pack_shm(&r, &g, &b) {
            Ok(fd) => {
                // Dup for the message so the fd we retain below isn't the one
                // wayland-client consumes while queuing the request.
                let dup = std::os::fd::AsFd::as_fd(&fd).try_clone_to_owned();
                control.set_gamma(fd);
                // Hold the duplicate alive until the next apply's roundtrip
                // has flushed this one to the socket.
                entry._shm_fd = dup.ok();
            }
            Err(e) => {
                eventline::warn!("colour: failed to pack gamma ramp for {}: {e}", entry.name);
                entry.failed = true;
                entry.recreate_at = Some(Instant::now() + RECREATE_DELAY);
            }
        }
    }
}

fn send_reports(reports: &tokio::sync::mpsc::UnboundedSender<ColourReport>, state: &AppState) {
    let outputs = state
        .outputs
        .values()
        .map(|e| OutputReport {
            name: e.name.clone(),
            ready: e.control.is_some() && e.size.is_some(),
            failed: e.failed,
        })
        .collect();
    let _ = reports.send(ColourReport {
        outputs,
        controls_initialized: state.controls_initialized,
    });
}
