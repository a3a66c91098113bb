// Author: Quayside contributors
// License: MIT

//! The Wayland gamma/colour-temperature controller (spec.md §4.6).

pub mod ramp;
pub mod schedule;
pub mod state;
pub mod wayland;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::core::notifier::Notifier;
use schedule::Geolocator;
use state::{ColourConfig, ColourState, OutputStatus};
use wayland::{ActorCommand, ColourReport};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);
const TRANSITION_STEPS: u32 = 30; // 1s at 30 FPS
const TRANSITION_STEP_INTERVAL: Duration = Duration::from_millis(1000 / 30);
const SCHEDULE_POLL: Duration = Duration::from_secs(60);

pub struct ColourController {
    state: Arc<RwLock<ColourState>>,
    config: Arc<RwLock<ColourConfig>>,
    notifier: Arc<Notifier<ColourState>>,
    command_tx: std_mpsc::Sender<ActorCommand>,
    trigger_tx: mpsc::Sender<()>,
    shutdown: Arc<AtomicBool>,
}

impl ColourController {
    /// Fails only if the gamma-control global is unavailable (`NoGammaControl`
    /// in spec.md terms) — surfaced to the caller as a plain string error,
    /// mapped onto that stable code at the router boundary.
    pub async fn new(config: ColourConfig) -> Arc<Self> {
        let state = Arc::new(RwLock::new(ColourState {
            enabled: config.enabled,
            current_temp: config.high_temp,
            target_temp: config.high_temp,
            next_transition: None,
            sunrise: None,
            sunset: None,
            is_day: None,
            outputs: Vec::new(),
            controls_initialized: config.enabled,
        }));
        let config = Arc::new(RwLock::new(config));

        let snapshot_state = Arc::clone(&state);
        let notifier = Arc::new(Notifier::spawn(
            move || {
                snapshot_state
                    .try_read()
                    .map(|g| g.clone())
                    .unwrap_or_default()
            },
            |prev, cur| {
                prev.enabled != cur.enabled
                    || prev.current_temp.abs_diff(cur.current_temp) >= 25
                    || prev.outputs.len() != cur.outputs.len()
                    || prev.next_transition != cur.next_transition
            },
        ));

        let (command_tx, command_rx) = std_mpsc::channel();
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();

        let initial_temp = {
            let g = config.read().await;
            g.high_temp as f64
        };
        let initial_gamma = config.read().await.gamma;
        let enabled = config.read().await.enabled;

        std::thread::spawn(move || {
            wayland::run(command_rx, reports_tx, initial_temp, initial_gamma, enabled);
        });

        let report_state = Arc::clone(&state);
        let report_notifier = Arc::clone(&notifier);
        tokio::spawn(async move {
            while let Some(report) = reports_rx.recv().await {
                let ColourReport {
                    outputs,
                    controls_initialized,
                } = report;
                let mut guard = report_state.write().await;
                guard.outputs = outputs
                    .into_iter()
                    .map(|r| OutputStatus {
                        name: r.name,
                        ready: r.ready,
                        failed: r.failed,
                    })
                    .collect();
                guard.controls_initialized = controls_initialized;
                drop(guard);
                report_notifier.mark_dirty();
            }
        });

        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let shutdown = Arc::new(AtomicBool::new(false));

        let scheduler_state = Arc::clone(&state);
        let scheduler_config = Arc::clone(&config);
        let scheduler_notifier = Arc::clone(&notifier);
        let scheduler_cmd_tx = command_tx.clone();
        let scheduler_shutdown = Arc::clone(&shutdown);
        tokio::spawn(run_scheduler(
            scheduler_state,
            scheduler_config,
            scheduler_notifier,
            scheduler_cmd_tx,
            trigger_rx,
            scheduler_shutdown,
        ));

        Arc::new(Self {
            state,
            config,
            notifier,
            command_tx,
            trigger_tx,
            shutdown,
        })
    }

    pub async fn get_state(&self) -> ColourState {
        self.state.read().await.clone()
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<ColourState> {
        self.notifier.subscribe().await
    }

    pub async fn set_config(&self, new_config: ColourConfig) {
        *self.config.write().await = new_config;
        let _ = self.trigger_tx.send(()).await;
    }

    /// Turn the gamma pipeline on: per spec.md §4.6 "When enabled, request a
    /// gamma control per output", this creates controls on the actor thread
    /// immediately rather than waiting for the next transition to finish.
    pub async fn enable(&self) {
        self.config.write().await.enabled = true;
        {
            let mut guard = self.state.write().await;
            guard.enabled = true;
            guard.controls_initialized = true;
        }
        let _ = self.command_tx.send(ActorCommand::SetEnabled(true));
        let _ = self.trigger_tx.send(()).await;
    }

    /// Turn the gamma pipeline off. Controls are not destroyed here: the
    /// scheduler resolves the new (disabled) target as identity temperature
    /// and, once the resulting smooth transition finishes, `spawn_transition`
    /// sends `SetEnabled(false)` to destroy them (spec.md §4.6 "Disabling":
    /// "transition smoothly to identity ... when the final step completes,
    /// destroy all gamma controls and mark initialized=false").
    pub async fn disable(&self) {
        self.config.write().await.enabled = false;
        self.state.write().await.enabled = false;
        let _ = self.trigger_tx.send(()).await;
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(ActorCommand::Shutdown);
    }
}

/// Combines the periodic scheduling recompute, the debounced
/// trigger-to-transition pipeline, and serial-numbered smooth transitions
/// into one task (spec.md §4.6 "Scheduling" / "Transitions").
async fn run_scheduler(
    state: Arc<RwLock<ColourState>>,
    config: Arc<RwLock<ColourConfig>>,
    notifier: Arc<Notifier<ColourState>>,
    command_tx: std_mpsc::Sender<ActorCommand>,
    mut triggers: mpsc::Receiver<()>,
    shutdown: Arc<AtomicBool>,
) {
    let geolocator = Geolocator::new();
    let serial = Arc::new(Mutex::new(0u64));

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let cfg = config.read().await.clone();
        let target = schedule::resolve(&cfg, &geolocator).await;

        {
            let mut guard = state.write().await;
            guard.target_temp = target.temp;
            guard.next_transition = Some(target.next_transition);
            guard.sunrise = target.sunrise;
            guard.sunset = target.sunset;
            guard.is_day = target.is_day;
        }
        notifier.mark_dirty();

        let my_serial = {
            let mut s = serial.lock().await;
            *s += 1;
            *s
        };

        spawn_transition(
            Arc::clone(&state),
            Arc::clone(&notifier),
            command_tx.clone(),
            target.temp as f64,
            cfg.gamma,
            my_serial,
            Arc::clone(&serial),
            !cfg.enabled,
        );

        tokio::select! {
            _ = tokio::time::sleep(SCHEDULE_POLL) => {}
            maybe = drain_triggers(&mut triggers) => {
                if maybe.is_none() {
                    return;
                }
            }
        }
    }
}

/// Drain any pending triggers, debouncing a burst down to one wakeup
/// (spec.md §4.6 "debounce 50 ms (drain pending triggers)").
async fn drain_triggers(triggers: &mut mpsc::Receiver<()>) -> Option<()> {
    let first = triggers.recv().await?;
    tokio::time::sleep(DEBOUNCE_WINDOW).await;
    while triggers.try_recv().is_ok() {}
    Some(first)
}

/// Linearly interpolate from the currently-published temperature to
/// `target` over one second at 30 FPS, aborting early if a newer serial
/// supersedes this transition. When `disabling` is true and the transition
/// runs to completion (i.e. is not superseded), the actor is told to
/// destroy every gamma control once the final step lands (spec.md §4.6
/// "Disabling").
fn spawn_transition(
    state: Arc<RwLock<ColourState>>,
    notifier: Arc<Notifier<ColourState>>,
    command_tx: std_mpsc::Sender<ActorCommand>,
    target: f64,
    gamma: f64,
    my_serial: u64,
    serial: Arc<Mutex<u64>>,
    disabling: bool,
) {
    tokio::spawn(async move {
        let start = state.read().await.current_temp as f64;
        for step in 1..=TRANSITION_STEPS {
            if *serial.lock().await != my_serial {
                return; // superseded
            }
            let t = step as f64 / TRANSITION_STEPS as f64;
            let current = start + (target - start) * t;

            if command_tx
                .send(ActorCommand::ApplyTemperature(current, gamma))
                .is_err()
            {
                return;
            }
            {
                let mut guard = state.write().await;
                guard.current_temp = current.round() as u32;
            }
            notifier.mark_dirty();

            tokio::time::sleep(TRANSITION_STEP_INTERVAL).await;
        }

        if disabling {
            let _ = command_tx.send(ActorCommand::SetEnabled(false));
            let mut guard = state.write().await;
            guard.controls_initialized = false;
            guard.outputs.clear();
            drop(guard);
            notifier.mark_dirty();
        }
    });
}
