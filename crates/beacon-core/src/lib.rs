//! # beacon-core
//!
//! The Beacon realtime client: one persistent pub/sub connection to a hosted
//! provider, with channel subscriptions, an offline message queue, token
//! refresh and automatic reconnection.
//!
//! - **Client** - connection state machine and public API
//! - **Registry** - channel subscriptions shared between handlers
//! - **Queue** - messages sent while offline, flushed in order
//! - **Token** - access token decoding and refresh planning
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  RealtimeClient  │────▶│  Handlers   │
//! └─────────────┘     └──────────────────┘     └─────────────┘
//!                        │             │
//!                        ▼             ▼
//!                 ┌─────────────┐ ┌─────────────┐
//!                 │ TriggerApi  │ │   AuthApi   │
//!                 └─────────────┘ └─────────────┘
//! ```
//!
//! The transport and the HTTP collaborators are traits, so the client can be
//! driven entirely in-process with
//! [`MemoryTransport`](beacon_transport::MemoryTransport).

pub mod api;
pub mod backoff;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod message;
mod queue;
mod registry;
pub mod state;
pub mod stats;
pub mod token;

pub use api::{
    ApiError, AuthApi, MemoryTokenStore, TokenStore, TriggerApi, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
pub use backoff::ReconnectPolicy;
pub use channel::{sanitize_channel_name, ChannelSubscription};
pub use client::{is_auth_failure, RealtimeClient, RealtimeClientBuilder};
pub use config::{ClientOptions, Environment};
pub use error::{codes, ClientError, ConnectionError};
pub use handlers::{ErrorObserver, MessageHandler, StateObserver};
pub use message::{InboundMessage, QueuedMessage, SendOptions, SendReceipt, SubscriptionId};
pub use state::ConnectionState;
pub use stats::Stats;
pub use token::{decode_claims, is_dev_token, is_placeholder_key, Claims, DecodeError};
