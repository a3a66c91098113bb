// Author: Quayside contributors
// License: MIT

//! The compositor-IPC mirror (spec.md §4.7).

pub mod state;
pub mod wayland;

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::core::notifier::Notifier;
use state::{ClientInfo, CompositorState, OutputView};
use wayland::{ActorCommand, Report};

pub struct CompositorMirror {
    state: Arc<RwLock<CompositorState>>,
    notifier: Arc<Notifier<CompositorState>>,
    command_tx: std_mpsc::Sender<ActorCommand>,
}

impl CompositorMirror {
    pub fn new(tag_count: u32, layouts: Vec<String>) -> Arc<Self> {
        let state = Arc::new(RwLock::new(CompositorState {
            available: false,
            outputs: HashMap::new(),
            tag_count,
            layouts,
            active_output: None,
        }));

        let snapshot_state = Arc::clone(&state);
        let notifier = Arc::new(Notifier::spawn(
            move || {
                snapshot_state
                    .try_read()
                    .map(|g| g.clone())
                    .unwrap_or_default()
            },
            |prev, cur| {
                prev.available != cur.available
                    || prev.outputs.len() != cur.outputs.len()
                    || prev.active_output != cur.active_output
                    || prev.outputs.iter().any(|(name, view)| {
                        cur.outputs
                            .get(name)
                            .is_none_or(|cur_view| cur_view.title != view.title
                                || cur_view.active != view.active
                                || cur_view.tags != view.tags
                                || cur_view.layout != view.layout)
                    })
            },
        ));

        let (command_tx, command_rx) = std_mpsc::channel();
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            wayland::run(command_rx, reports_tx);
        });

        let report_state = Arc::clone(&state);
        let report_notifier = Arc::clone(&notifier);
        tokio::spawn(async move {
            while let Some(report) = reports_rx.recv().await {
                apply_report(&report_state, &report).await;
                report_notifier.mark_dirty();
            }
        });

        Arc::new(Self {
            state,
            notifier,
            command_tx,
        })
    }

    pub async fn get_state(&self) -> CompositorState {
        self.state.read().await.clone()
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<CompositorState> {
        self.notifier.subscribe().await
    }

    pub fn set_tags(&self, output: &str, tags: u32) -> Result<(), String> {
        self.command_tx
            .send(ActorCommand::SetTags {
                output: output.to_string(),
                tags,
            })
            .map_err(|_| "compositor actor unavailable".to_string())
    }

    pub fn set_client_tags(&self, handle_id: u32, tags: u32) -> Result<(), String> {
        self.command_tx
            .send(ActorCommand::SetClientTags { handle_id, tags })
            .map_err(|_| "compositor actor unavailable".to_string())
    }

    pub fn set_layout(&self, output: &str, layout: &str) -> Result<(), String> {
        self.command_tx
            .send(ActorCommand::SetLayout {
                output: output.to_string(),
                layout: layout.to_string(),
            })
            .map_err(|_| "compositor actor unavailable".to_string())
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ActorCommand::Shutdown);
    }
}

async fn apply_report(state: &Arc<RwLock<CompositorState>>, report: &Report) {
    let mut guard = state.write().await;
    guard.available = report.available;

    let mut outputs: HashMap<String, OutputView> = report
        .outputs
        .iter()
        .map(|o| {
            (
                o.name.clone(),
                OutputView {
                    tags: o.tags,
                    layout: o.layout.clone(),
                    ..Default::default()
                },
            )
        })
        .collect();

    for toplevel in &report.toplevels {
        let client = ClientInfo {
            title: toplevel.title.clone(),
            app_id: toplevel.app_id.clone(),
            active: toplevel.active,
            tags: toplevel.tags,
        };

        let Some(output_name) = &toplevel.output_name else {
            continue;
        };
        if let Some(view) = outputs.get_mut(output_name) {
            if toplevel.active {
                view.title = client.title.clone();
                view.app_id = client.app_id.clone();
                view.active = true;
            }
            view.clients.push(client);
        }
    }

    guard.active_output = outputs
        .iter()
        .find(|(_, v)| v.active)
        .map(|(name, _)| name.clone());
    guard.outputs = outputs;
}
