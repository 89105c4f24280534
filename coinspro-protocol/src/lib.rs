//! # coinspro-protocol
//!
//! Wire protocol implementation for the Coins Pro WebSocket gateway.
//!
//! This crate provides:
//! - The `{m, i, n, o}` frame envelope and its message type codes
//! - Text codec with a tolerant second-stage payload parser
//! - The catalog of remote function names and how inbound names are routed
//! - HMAC-SHA256 request signing for the authentication handshake

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod signer;

pub use codec::{Decoder, Encoder, Payload};
pub use error::ProtocolError;
pub use frame::{Frame, MessageType};
pub use message::{EventClass, RemoteError, Route};
pub use signer::sign;

/// Production gateway endpoint.
pub const DEFAULT_URL: &str = "wss://api-cx.coins.asia/WSGateway/";

/// Order management system id. The gateway only runs one.
pub const DEFAULT_OMS_ID: u64 = 1;

/// Amount the client-side sequence number advances per originated frame.
pub const SEQUENCE_STEP: u64 = 2;

/// Maximum accepted inbound frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
