// Author: Quayside contributors
// License: MIT

//! Token-keyed rendezvous between secret-requesting backends and subscribing
//! UIs (spec.md §4.5).
//!
//! `ask` allocates a single-slot reply channel and records the request,
//! fanning a notification out to credential-prompt subscribers. `wait`
//! blocks on that slot subject to the caller's deadline. `resolve` delivers
//! exactly one reply. Tokens are single-use: whichever of `wait`/timeout
//! happens first removes the bookkeeping entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};

use crate::core::notifier::Notifier;
use crate::error::PromptError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub token: String,
    pub ssid: Option<String>,
    pub connection_type: String,
    pub vpn_service_id: Option<String>,
    pub setting_name: String,
    pub required_fields: Vec<String>,
    pub hints: Vec<String>,
    pub reason: PromptReason,
    pub connection_id: Option<String>,
    pub connection_uuid: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PromptReason {
    Required,
    UserRequested,
    WrongPassword,
}

#[derive(Debug, Clone, Default)]
pub struct PromptReply {
    pub secrets: HashMap<String, String>,
    pub save: bool,
    pub cancel: bool,
}

const TOKEN_TIMEOUT: Duration = Duration::from_secs(120);

struct PendingSlot {
    reply_tx: Option<oneshot::Sender<PromptReply>>,
}

pub struct PromptBroker {
    pending: Mutex<HashMap<String, PendingSlot>>,
    waiters: Mutex<HashMap<String, oneshot::Receiver<PromptReply>>>,
    notifier: Notifier<PromptRequest>,
    // The most recently issued request per token, retained only so the
    // notifier's snapshot fn has something to hand new subscribers; the
    // notifier itself coalesces on a per-request basis via mark_dirty.
    last_issued: Arc<Mutex<Option<PromptRequest>>>,
}

impl PromptBroker {
    pub fn new() -> Arc<Self> {
        let last_issued: Arc<Mutex<Option<PromptRequest>>> = Arc::new(Mutex::new(None));
        let snap_src = Arc::clone(&last_issued);

        // Every distinct prompt request is itself the "change" worth
        // notifying about, so the predicate always fires: this notifier's
        // job is fan-out, not deduplication of identical asks.
        let notifier = Notifier::spawn(
            move || {
                // Best-effort synchronous snapshot; requests arrive rarely
                // enough that blocking briefly on the mutex is acceptable.
                snap_src
                    .try_lock()
                    .ok()
                    .and_then(|g| g.clone())
                    .unwrap_or_else(|| PromptRequest {
                        token: String::new(),
                        ssid: None,
                        connection_type: String::new(),
                        vpn_service_id: None,
                        setting_name: String::new(),
                        required_fields: Vec::new(),
                        hints: Vec::new(),
                        reason: PromptReason::Required,
                        connection_id: None,
                        connection_uuid: None,
                    })
            },
            |prev, cur| prev.token != cur.token,
        );

        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            notifier,
            last_issued,
        })
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 16]; // 128-bit opaque hex token
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Allocate a token, record the request, and notify credential-prompt
    /// subscribers. Returns the token the caller threads through `wait`.
    pub async fn ask(&self, mut request: PromptRequest) -> String {
        let token = Self::generate_token();
        request.token = token.clone();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(
            token.clone(),
            PendingSlot {
                reply_tx: Some(reply_tx),
            },
        );
        self.waiters.lock().await.insert(token.clone(), reply_rx);

        *self.last_issued.lock().await = Some(request.clone());
        self.notifier.mark_dirty();

        token
    }

    /// Block for a reply, honouring the 120s secret-prompt timeout and
    /// caller cancellation. Cleans up bookkeeping on every exit path.
    pub async fn wait(&self, token: &str) -> Result<PromptReply, PromptError> {
        let rx = self.waiters.lock().await.remove(token);
        let Some(rx) = rx else {
            return Err(PromptError::UnknownToken);
        };

        let result = tokio::time::timeout(TOKEN_TIMEOUT, rx).await;
        self.pending.lock().await.remove(token);

        match result {
            Ok(Ok(reply)) if reply.cancel => Err(PromptError::Cancelled),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(PromptError::UnknownToken), // sender dropped without resolve
            Err(_) => Err(PromptError::Timeout),
        }
    }

    /// Deliver one reply for `token`. Errors if the token is unknown/expired
    /// or the channel is already full (single-use violated).
    pub async fn resolve(&self, token: &str, reply: PromptReply) -> Result<(), PromptError> {
        let mut pending = self.pending.lock().await;
        let slot = pending.get_mut(token).ok_or(PromptError::UnknownToken)?;
        let tx = slot.reply_tx.take().ok_or(PromptError::ChannelFull)?;
        tx.send(reply).map_err(|_| PromptError::ChannelFull)
    }

    pub async fn subscribe(&self) -> tokio::sync::mpsc::Receiver<PromptRequest> {
        self.notifier.subscribe().await
    }
}
