//! # beacon-protocol
//!
//! Wire types shared by the Beacon realtime client.
//!
//! Two kinds of payload cross the network:
//!
//! - **API bodies** (`api`) - JSON documents exchanged with the authenticated
//!   HTTP endpoints that refresh tokens and trigger channel events.
//! - **Frames** (`frames`) - the binary messages spoken over the realtime
//!   WebSocket, encoded with a length-prefixed MessagePack codec (`codec`).
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::subscribe(1, "chat-lobby");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod api;
pub mod codec;
pub mod frames;

pub use api::{RefreshRequest, TokenPair, TriggerRequest, TriggerResponse};
pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, ServerFrame, CLOSE_UNAUTHORIZED, PROTOCOL_VERSION};
