//! # beacon-transport
//!
//! The transport connection consumed by the Beacon realtime client.
//!
//! The client core never talks to the network directly. It owns exactly one
//! [`Transport`], opens it with a channel-authentication token, subscribes
//! sanitized channel names on it, and consumes the [`TransportEvent`] stream
//! it hands back:
//!
//! - **WebSocket** - the production transport, speaking `beacon-protocol` frames
//! - **Memory** - an in-process, scriptable transport for tests and offline runs
//!
//! ```rust,ignore
//! use beacon_transport::{ConnectParams, Transport, TransportEvent};
//!
//! async fn watch(transport: &dyn Transport) {
//!     let mut events = transport.connect(ConnectParams::default()).await.unwrap();
//!     while let Some(event) = events.recv().await {
//!         if let TransportEvent::Disconnected { reason } = event {
//!             println!("lost connection: {reason}");
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryTransport;
pub use traits::{
    ChannelEvent, ChannelHandle, ConnectParams, EventStream, Transport, TransportError,
    TransportEvent, TransportFault, MESSAGE_EVENT,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
