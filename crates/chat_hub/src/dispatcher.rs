//! Broadcast dispatcher: inbound queue → per-client fan-out.
//!
//! A single task drains the shared inbound queue and fans each payload out
//! to every registered client. It is the only bridge between the inbound
//! and outbound queues.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::ClientRegistry;
use crate::protocol::Envelope;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client outbound queue capacity. A client that falls this many
    /// messages behind is evicted on the next broadcast.
    pub outbound_capacity: usize,
    /// Capacity of the shared inbound broadcast queue.
    pub inbound_capacity: usize,
    /// Whether a sender receives its own broadcasts.
    pub echo_to_sender: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            inbound_capacity: 1024,
            echo_to_sender: false,
        }
    }
}

/// The single fan-out worker.
pub struct Dispatcher {
    /// Registry the fan-out pass iterates.
    registry: Arc<ClientRegistry>,
    /// Shared inbound queue, fed by every connection's read loop.
    inbound_rx: mpsc::Receiver<String>,
    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
    /// Whether the sender is included among recipients.
    echo_to_sender: bool,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        registry: Arc<ClientRegistry>,
        inbound_rx: mpsc::Receiver<String>,
        shutdown_rx: mpsc::Receiver<()>,
        config: &HubConfig,
    ) -> Self {
        Self {
            registry,
            inbound_rx,
            shutdown_rx,
            echo_to_sender: config.echo_to_sender,
        }
    }

    /// Run the dispatcher (blocking). Exits on the shutdown signal or when
    /// every inbound sender is gone.
    pub async fn run(mut self) {
        info!("Dispatcher running (echo_to_sender: {})", self.echo_to_sender);

        loop {
            tokio::select! {
                biased;  // Prioritize shutdown signal

                _ = self.shutdown_rx.recv() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }

                msg = self.inbound_rx.recv() => {
                    match msg {
                        Some(payload) => self.dispatch(&payload),
                        None => {
                            warn!("Inbound queue closed, stopping dispatcher");
                            break;
                        }
                    }
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Fan one payload out to all registered clients. A payload that does
    /// not decode as an envelope is dropped; it never stops the loop or
    /// affects other messages.
    fn dispatch(&self, payload: &str) {
        let envelope = match Envelope::from_json(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed broadcast payload: {:?}", e);
                counter!("hub_decode_errors_total").increment(1);
                return;
            }
        };

        let exclude = (!self.echo_to_sender).then_some(envelope.sender.as_str());
        let fan_out = self.registry.broadcast(payload, exclude);

        counter!("hub_messages_broadcast_total").increment(1);
        debug!(
            "Broadcast from {}: {} delivered, {} evicted",
            envelope.sender,
            fan_out.delivered,
            fan_out.evicted.len()
        );
    }
}
