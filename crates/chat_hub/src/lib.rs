//! Real-time WebSocket broadcast hub.
//!
//! Clients connect on `/ws`, send text messages, and receive every other
//! connected client's messages (or every client's, when self-echo is
//! enabled).
//!
//! ## Architecture
//!
//! ```text
//! per-connection read loops
//!         ↓
//! inbound queue (bounded mpsc)
//!         ↓
//! Dispatcher (single fan-out task)
//!         ↓ try_send, under one registry lock
//! ClientRegistry
//!         ↓
//! per-client outbound queues → forward tasks → sockets
//! ```
//!
//! ## Slow-Client Policy
//!
//! Fan-out never blocks: a client whose outbound queue is full is evicted
//! on the spot, so one stalled consumer costs itself the connection rather
//! than delaying delivery to everyone else.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod ws_server;

pub use client::{ClientId, ClientRegistry, ClientState, FanOut};
pub use dispatcher::{Dispatcher, HubConfig};
pub use error::{HubError, Result};
pub use protocol::Envelope;
pub use ws_server::{create_router, AppState};
