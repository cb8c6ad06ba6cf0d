//! Interaction service: pending approval broker
//!
//! A caller that needs user confirmation registers an interaction and
//! suspends until some UI surface approves or rejects it. The host cannot
//! reliably signal when a UI surface unmounts, so a polling liveness loop
//! pings each window hosting pending interactions and mass-rejects the
//! window's interactions when a previously-responsive window stops
//! answering. Rejection is always explicit, never a silent drop.

use crate::errors::{Result, WalletError};
use async_trait::async_trait;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const INTERACTION_ID_SIZE: usize = 12;

/// Where the request originated.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionEnv {
    /// True when the caller is already inside the wallet UI
    pub is_internal: bool,
    pub tab_id: Option<i64>,
    pub window_id: Option<i64>,
}

/// One pending approval request.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub interaction_type: String,
    #[serde(rename = "isInternal")]
    pub is_internal: bool,
    #[serde(rename = "tabId")]
    pub tab_id: Option<i64>,
    #[serde(rename = "windowId")]
    pub window_id: Option<i64>,
    pub uri: String,
    pub data: Value,
}

/// Host-side delivery seam for interactions and liveness probes.
#[async_trait]
pub trait InteractionTransport: Send + Sync {
    /// Navigate a wallet UI surface to the interaction. `replace_uri` is
    /// suppressed for external requests outside side-panel mode, where the
    /// popup may already be showing unrelated content.
    async fn push_to_ui(&self, record: &InteractionRecord, replace_uri: bool) -> Result<()>;

    /// Hand the interaction to the originating page so it can open the side
    /// panel itself; the background cannot open one programmatically.
    async fn push_to_page(&self, record: &InteractionRecord) -> Result<()>;

    /// Round-trip liveness probe. `force` ignores the window scoping and
    /// asks whether any UI surface is alive.
    async fn ping(&self, window_id: Option<i64>, force: bool) -> bool;
}

type Resolver = Box<dyn FnOnce() + Send>;

struct Waiting {
    record: InteractionRecord,
    tx: tokio::sync::oneshot::Sender<Result<Value>>,
    /// Post-resolution callbacks; all run before the waiting future completes
    resolvers: Vec<Resolver>,
    /// Set once a liveness probe has confirmed a UI surface for this window
    ui_opened: bool,
}

impl Waiting {
    fn resolve(self, outcome: Result<Value>) {
        for resolver in self.resolvers {
            resolver();
        }
        let _ = self.tx.send(outcome);
    }
}

pub struct InteractionService {
    transport: Arc<dyn InteractionTransport>,
    side_panel_enabled: bool,
    ping_interval: Duration,
    waiting: Arc<Mutex<HashMap<String, Waiting>>>,
    ping_loop_running: Arc<AtomicBool>,
}

impl InteractionService {
    pub fn new(
        transport: Arc<dyn InteractionTransport>,
        ping_interval: Duration,
        side_panel_enabled: bool,
    ) -> Self {
        Self {
            transport,
            side_panel_enabled,
            ping_interval,
            waiting: Arc::new(Mutex::new(HashMap::new())),
            ping_loop_running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn random_id() -> String {
        let mut bytes = [0u8; INTERACTION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Register an interaction and suspend until a UI resolves it.
    pub async fn wait_approve(
        &self,
        env: InteractionEnv,
        uri: &str,
        interaction_type: &str,
        data: Value,
    ) -> Result<Value> {
        self.wait_approve_with_id(Self::random_id(), env, uri, interaction_type, data)
            .await
    }

    pub(crate) async fn wait_approve_with_id(
        &self,
        id: String,
        env: InteractionEnv,
        uri: &str,
        interaction_type: &str,
        data: Value,
    ) -> Result<Value> {
        let record = InteractionRecord {
            id: id.clone(),
            interaction_type: interaction_type.to_string(),
            is_internal: env.is_internal,
            tab_id: env.tab_id,
            window_id: env.window_id,
            uri: uri.to_string(),
            data,
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut waiting = self.waiting.lock().unwrap();
            if waiting.contains_key(&id) {
                return Err(WalletError::IdInUse(id));
            }
            waiting.insert(
                id.clone(),
                Waiting {
                    record: record.clone(),
                    tx,
                    resolvers: Vec::new(),
                    ui_opened: false,
                },
            );

            // Flag transitions only happen under the map lock, so the loop
            // cannot exit between this check and our insert
            if self
                .ping_loop_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.spawn_ping_loop();
            }
        }

        let pushed = if env.is_internal {
            self.transport.push_to_ui(&record, true).await
        } else if self.side_panel_enabled {
            self.transport.push_to_page(&record).await
        } else {
            self.transport.push_to_ui(&record, false).await
        };
        if let Err(err) = pushed {
            self.waiting.lock().unwrap().remove(&id);
            return Err(err);
        }

        debug!("Waiting on interaction {} ({})", id, interaction_type);
        rx.await
            .map_err(|_| WalletError::InternalError("interaction dropped unresolved".to_string()))?
    }

    /// Register a cleanup callback that runs after resolution but before the
    /// waiting future completes. No-op for unknown ids.
    pub fn add_resolver(&self, id: &str, resolver: Resolver) {
        if let Some(entry) = self.waiting.lock().unwrap().get_mut(id) {
            entry.resolvers.push(resolver);
        }
    }

    /// Idempotent: resolving an already-resolved or unknown id is a no-op.
    pub fn approve(&self, id: &str, result: Value) {
        // Take the entry out first; resolvers may re-enter the service and
        // must not run under the map lock
        let entry = self.waiting.lock().unwrap().remove(id);
        if let Some(entry) = entry {
            debug!("Interaction {} approved", id);
            entry.resolve(Ok(result));
        }
    }

    /// Idempotent: resolving an already-resolved or unknown id is a no-op.
    pub fn reject(&self, id: &str) {
        let entry = self.waiting.lock().unwrap().remove(id);
        if let Some(entry) = entry {
            debug!("Interaction {} rejected", id);
            entry.resolve(Err(WalletError::RequestRejected));
        }
    }

    /// Close callback from the hosting UI surface.
    pub fn on_ui_closed(&self, id: &str) {
        self.reject(id);
    }

    /// A page closed. In side-panel mode, interactions that page originated
    /// and that no UI ever opened for are dead and get rejected.
    pub fn on_injected_webpage_closed(&self, tab_id: i64) {
        if !self.side_panel_enabled {
            return;
        }
        let dead: Vec<Waiting> = {
            let mut waiting = self.waiting.lock().unwrap();
            let ids: Vec<String> = waiting
                .iter()
                .filter(|(_, w)| {
                    !w.record.is_internal && w.record.tab_id == Some(tab_id) && !w.ui_opened
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| waiting.remove(&id)).collect()
        };
        for entry in dead {
            warn!(
                "Rejecting interaction {} from closed tab {}",
                entry.record.id, tab_id
            );
            entry.resolve(Err(WalletError::RequestRejected));
        }
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    fn spawn_ping_loop(&self) {
        let transport = self.transport.clone();
        let waiting = self.waiting.clone();
        let running = self.ping_loop_running.clone();
        let interval = self.ping_interval;

        tokio::spawn(async move {
            // Previous probe outcome per window; a true -> false transition
            // means the window's UI died
            let mut last: HashMap<Option<i64>, bool> = HashMap::new();
            loop {
                tokio::time::sleep(interval).await;

                // Re-read the live window set each iteration; interactions
                // may be added mid-poll
                let windows: HashSet<Option<i64>> = {
                    let waiting = waiting.lock().unwrap();
                    if waiting.is_empty() {
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    waiting.values().map(|w| w.record.window_id).collect()
                };

                for window_id in windows {
                    let alive = transport.ping(window_id, window_id.is_none()).await;
                    let was_alive = last.get(&window_id).copied();

                    if was_alive == Some(true) && !alive {
                        let dead: Vec<Waiting> = {
                            let mut waiting = waiting.lock().unwrap();
                            let ids: Vec<String> = waiting
                                .iter()
                                .filter(|(_, w)| w.record.window_id == window_id)
                                .map(|(id, _)| id.clone())
                                .collect();
                            ids.into_iter().filter_map(|id| waiting.remove(&id)).collect()
                        };
                        warn!(
                            "UI for window {:?} stopped answering; rejecting {} interactions",
                            window_id,
                            dead.len()
                        );
                        for entry in dead {
                            entry.resolve(Err(WalletError::RequestRejected));
                        }
                    } else if alive {
                        // Every successful probe marks the window's pending
                        // interactions as opened, including ones registered
                        // after the first success
                        let mut waiting = waiting.lock().unwrap();
                        for entry in waiting.values_mut() {
                            if entry.record.window_id == window_id {
                                entry.ui_opened = true;
                            }
                        }
                    }
                    last.insert(window_id, alive);
                }
            }
        });
    }
}
