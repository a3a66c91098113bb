// Author: Quayside contributors
// License: MIT

//! The login-session controller (spec.md §4.3): mirrors session properties
//! and drives the lock-before-suspend handshake around a single delay
//! inhibitor file descriptor.

pub mod dbus;
pub mod inhibitor;
pub mod state;

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use zbus::Connection;

use crate::core::notifier::Notifier;
use dbus::LoginEvent;
use state::SessionState;

const LOCK_GUARD_TIMER: Duration = Duration::from_secs(1);

enum ControlMsg {
    LockerReady,
}

pub struct LoginSessionController {
    state: Arc<RwLock<SessionState>>,
    notifier: Arc<Notifier<SessionState>>,
    control_tx: mpsc::Sender<ControlMsg>,
}

impl LoginSessionController {
    /// Returns `Err` only when the session path cannot be resolved at
    /// startup — per spec.md §4.3 that is fatal to this controller alone.
    pub async fn new(lock_before_suspend: bool) -> Result<Arc<Self>, String> {
        let conn = Connection::system().await.map_err(|e| e.to_string())?;
        let session_path = dbus::current_session_path(&conn).await?;

        let state = Arc::new(RwLock::new(SessionState::default()));
        let snapshot_state = Arc::clone(&state);
        let notifier = Notifier::spawn(
            move || {
                snapshot_state
                    .try_read()
                    .map(|g| g.clone())
                    .unwrap_or_default()
            },
            |prev, cur| {
                prev.active != cur.active
                    || prev.idle != cur.idle
                    || prev.locked != cur.locked
                    || prev.preparing_for_sleep != cur.preparing_for_sleep
                    || prev.inhibitor_held != cur.inhibitor_held
            },
        );

        let notifier = Arc::new(notifier);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (control_tx, control_rx) = mpsc::channel(8);

        dbus::spawn_listeners(conn.clone(), session_path, event_tx);

        let initial_fd = inhibitor::acquire(&conn).await;
        {
            let mut guard = state.write().await;
            guard.inhibitor_held = initial_fd.is_some();
        }
        notifier.mark_dirty();

        let actor_state = Arc::clone(&state);
        let actor_notifier = Arc::clone(&notifier);
        tokio::spawn(run_actor(
            conn,
            actor_state,
            actor_notifier,
            lock_before_suspend,
            initial_fd,
            event_rx,
            control_rx,
        ));

        Ok(Arc::new(Self {
            state,
            notifier,
            control_tx,
        }))
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<SessionState> {
        self.notifier.subscribe().await
    }

    /// `lockerReady` RPC: signal the actor that the locker has finished
    /// drawing and the inhibitor can be released.
    pub async fn locker_ready(&self) -> Result<(), String> {
        self.control_tx
            .send(ControlMsg::LockerReady)
            .await
            .map_err(|_| "login session actor has shut down".to_string())
    }
}

async fn run_actor(
    conn: Connection,
    state: Arc<RwLock<SessionState>>,
    notifier: Arc<Notifier<SessionState>>,
    lock_before_suspend: bool,
    mut inhibitor_fd: Option<OwnedFd>,
    mut events: mpsc::Receiver<LoginEvent>,
    mut control: mpsc::Receiver<ControlMsg>,
) {
    let mut locker_ready_tx: Option<oneshot::Sender<()>> = None;
    let mut locker_ready_rx: Option<oneshot::Receiver<()>> = None;
    let mut guard_timer_active = false;

    loop {
        let guard_sleep = async {
            if guard_timer_active {
                tokio::time::sleep(LOCK_GUARD_TIMER).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        let locker_wait = async {
            match locker_ready_rx.as_mut() {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    LoginEvent::PrepareForSleep(true) => {
                        {
                            let mut guard = state.write().await;
                            guard.preparing_for_sleep = true;
                        }
                        if lock_before_suspend {
                            issue_lock(&conn).await;
                            let (tx, rx) = oneshot::channel();
                            locker_ready_tx = Some(tx);
                            locker_ready_rx = Some(rx);
                        }
                        notifier.mark_dirty();
                    }
                    LoginEvent::PrepareForSleep(false) => {
                        {
                            let mut guard = state.write().await;
                            guard.preparing_for_sleep = false;
                        }
                        if inhibitor_fd.is_none() {
                            inhibitor_fd = inhibitor::acquire(&conn).await;
                            state.write().await.inhibitor_held = inhibitor_fd.is_some();
                        }
                        notifier.mark_dirty();
                    }
                    LoginEvent::Lock => {
                        {
                            let mut guard = state.write().await;
                            guard.locked = true;
                        }
                        guard_timer_active = true;
                        notifier.mark_dirty();
                    }
                    LoginEvent::Unlock => {
                        guard_timer_active = false;
                        locker_ready_tx = None;
                        locker_ready_rx = None;
                        if inhibitor_fd.is_none() {
                            inhibitor_fd = inhibitor::acquire(&conn).await;
                            state.write().await.inhibitor_held = inhibitor_fd.is_some();
                        }
                        {
                            let mut guard = state.write().await;
                            guard.locked = false;
                        }
                        notifier.mark_dirty();
                    }
                    LoginEvent::PropertiesChanged { active, idle_hint, idle_since_hint, locked_hint } => {
                        let mut guard = state.write().await;
                        if let Some(v) = active { guard.active = v; }
                        if let Some(v) = idle_hint { guard.idle = v; }
                        if let Some(v) = idle_since_hint { guard.idle_since_hint = Some(v); }
                        if let Some(v) = locked_hint { guard.locked = v; }
                        drop(guard);
                        notifier.mark_dirty();
                    }
                    LoginEvent::NameOwnerChanged { .. } => {
                        eventline::info!("login: logind restarted, re-hydrating session state");
                        if !state.read().await.preparing_for_sleep && inhibitor_fd.is_none() {
                            inhibitor_fd = inhibitor::acquire(&conn).await;
                            state.write().await.inhibitor_held = inhibitor_fd.is_some();
                            notifier.mark_dirty();
                        }
                    }
                }
            }
            control_msg = control.recv() => {
                let Some(ControlMsg::LockerReady) = control_msg else { break };
                if let Some(tx) = locker_ready_tx.take() {
                    let _ = tx.send(());
                }
            }
            _ = guard_sleep => {
                guard_timer_active = false;
                eventline::warn!("login: lock guard timer fired without lockerReady");
                release_inhibitor(&mut inhibitor_fd, &state).await;
                notifier.mark_dirty();
            }
            _ = locker_wait => {
                locker_ready_rx = None;
                release_inhibitor(&mut inhibitor_fd, &state).await;
                notifier.mark_dirty();
            }
        }
    }
}

async fn release_inhibitor(fd: &mut Option<OwnedFd>, state: &Arc<RwLock<SessionState>>) {
    if fd.take().is_some() {
        state.write().await.inhibitor_held = false;
    }
}

async fn issue_lock(conn: &Connection) {
    let Ok(manager) = zbus::Proxy::new(
        conn,
        "org.freedesktop.login1",
        "/org/freedesktop/login1",
        "org.freedesktop.login1.Manager",
    )
    .await
    else {
        return;
    };
    let pid = std::process::id();
    if let Ok(reply) = manager.call_method("GetSessionByPID", &(pid,)).await {
        if let Ok(path) = reply.body().deserialize::<zbus::zvariant::OwnedObjectPath>() {
            if let Ok(session) = zbus::Proxy::new(
                conn,
                "org.freedesktop.login1",
                path,
                "org.freedesktop.login1.Session",
            )
            .await
            {
                let _ = session.call_method("Lock", &()).await;
            }
        }
    }
}
