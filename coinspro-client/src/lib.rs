//! # coinspro-client
//!
//! Session engine for the Coins Pro WebSocket gateway.
//!
//! This crate provides:
//! - An authenticated session over a single WebSocket
//! - Correlation of replies to requests by sequence number
//! - Persistent subscriptions keyed by event class and instrument
//! - A high-level API for the gateway's remote functions
//! - Optional custom TLS roots

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod session;
pub mod subscription;
pub mod tls;
pub mod transport;

pub use client::{Client, NewOrder, OrderFeeQuery, OrderType, Side, TicketQuery};
pub use config::{ClientConfig, ConfigError, Credentials, TlsClientConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, Envelope};
pub use error::ClientError;
pub use session::{ClientIdentity, PendingReply, Session, SessionState};
pub use subscription::{Listener, SubscriptionKey};
