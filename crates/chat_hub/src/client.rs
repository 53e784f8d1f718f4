//! Client state and registry management.
//!
//! One mutex guards the registry map so that the fan-out pass iterates
//! under the same exclusive access insertions and removals use. The guard
//! is held only for map operations, never across an `.await` or socket
//! write, so a full pass stays bounded regardless of client health.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::Message;
use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Unique client identifier: the remote socket address rendered to a string.
pub type ClientId = String;

/// State for a single connected client.
pub struct ClientState {
    /// Client identity, stable for the connection's lifetime.
    pub id: ClientId,
    /// Bounded outbound queue; written by the dispatcher via `try_send`,
    /// drained by the connection's forward task.
    tx: mpsc::Sender<Message>,
    /// Timestamp when the client connected (milliseconds).
    pub connected_at: i64,
}

impl ClientState {
    /// Create client state around a bounded outbound sender.
    pub fn new(id: ClientId, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            tx,
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Non-blocking enqueue onto this client's outbound queue.
    pub fn try_send(&self, msg: Message) -> std::result::Result<(), TrySendError<Message>> {
        self.tx.try_send(msg)
    }
}

/// Registry of currently connected clients.
///
/// Holds the only long-lived handle to each `ClientState`, so removing an
/// entry drops the last outbound `Sender` and closes that client's queue —
/// eviction and queue close are one operation.
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Arc<ClientState>>>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Register a client. Replacing an existing entry with the same id
    /// drops the old state and closes its queue.
    pub fn register(&self, client: ClientState) -> ClientId {
        let id = client.id.clone();
        let mut clients = self.clients.lock().unwrap();
        if clients.insert(id.clone(), Arc::new(client)).is_some() {
            warn!("Client {} re-registered, previous queue closed", id);
        }
        gauge!("hub_active_connections").set(clients.len() as f64);
        id
    }

    /// Remove a client, closing its outbound queue. Removing an absent id
    /// is a no-op; both the read loop's disconnect path and the
    /// dispatcher's eviction path may call this for the same client.
    pub fn unregister(&self, client_id: &str) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let removed = clients.remove(client_id).is_some();
        gauge!("hub_active_connections").set(clients.len() as f64);
        if removed {
            debug!("Client {} unregistered", client_id);
        }
        removed
    }

    /// Whether a client is currently registered.
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.lock().unwrap().contains_key(client_id)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Fan a pre-serialized payload out to every registered client with a
    /// non-blocking send. A client whose queue is full (not draining fast
    /// enough) or closed (forward task gone) is evicted in the same pass.
    /// `exclude` skips the named client — the sender, when self-echo is off.
    pub fn broadcast(&self, payload: &str, exclude: Option<&str>) -> FanOut {
        let mut fan_out = FanOut::default();
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|id, client| {
            if exclude == Some(id.as_str()) {
                return true;
            }
            match client.try_send(Message::Text(payload.to_owned().into())) {
                Ok(()) => {
                    fan_out.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} outbound queue full, evicting", id);
                    counter!("hub_clients_evicted_total", "reason" => "slow").increment(1);
                    fan_out.evicted.push(id.clone());
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} outbound queue closed, removing", id);
                    counter!("hub_clients_evicted_total", "reason" => "closed").increment(1);
                    fan_out.evicted.push(id.clone());
                    false
                }
            }
        });
        gauge!("hub_active_connections").set(clients.len() as f64);
        fan_out
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Clients whose queues accepted the payload.
    pub delivered: usize,
    /// Clients evicted because their queue was full or closed.
    pub evicted: Vec<ClientId>,
}
