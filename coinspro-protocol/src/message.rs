//! Remote function names and inbound routing rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Function names
// ============================================================================

pub const AUTHENTICATE_USER: &str = "AuthenticateUser";
pub const PING: &str = "Ping";

pub const SUBSCRIBE_LEVEL1: &str = "SubscribeLevel1";
pub const LEVEL1_UPDATE_EVENT: &str = "Level1UpdateEvent";
pub const UNSUBSCRIBE_LEVEL1: &str = "UnsubscribeLevel1";

pub const SUBSCRIBE_LEVEL2: &str = "SubscribeLevel2";
pub const LEVEL2_UPDATE_EVENT: &str = "Level2UpdateEvent";
pub const UNSUBSCRIBE_LEVEL2: &str = "UnsubscribeLevel2";

pub const SUBSCRIBE_TRADES: &str = "SubscribeTrades";
pub const TRADE_DATA_UPDATE_EVENT: &str = "TradeDataUpdateEvent";
pub const UNSUBSCRIBE_TRADES: &str = "UnsubscribeTrades";

pub const SUBSCRIBE_ACCOUNT_EVENTS: &str = "SubscribeAccountEvents";

/// Push events delivered to an account-events subscription.
pub const ACCOUNT_EVENTS: [&str; 7] = [
    "PendingDepositUpdate",
    "AccountPositionEvent",
    "OrderStateEvent",
    "OrderTradeEvent",
    "NewOrderRejectEvent",
    "CancelOrderRejectEvent",
    "MarketStateUpdate",
];

/// Column of the instrument id in a level-2 row.
pub const LEVEL2_INSTRUMENT_COLUMN: usize = 7;

/// Column of the instrument id in a trade row.
pub const TRADE_INSTRUMENT_COLUMN: usize = 1;

// ============================================================================
// Routing
// ============================================================================

/// Class of a persistent event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    Level1,
    Level2,
    Trades,
    AccountEvents,
}

impl EventClass {
    /// Maps a subscribe function name to its event class.
    pub fn from_subscribe_name(name: &str) -> Option<Self> {
        match name {
            SUBSCRIBE_LEVEL1 => Some(EventClass::Level1),
            SUBSCRIBE_LEVEL2 => Some(EventClass::Level2),
            SUBSCRIBE_TRADES => Some(EventClass::Trades),
            SUBSCRIBE_ACCOUNT_EVENTS => Some(EventClass::AccountEvents),
            _ => None,
        }
    }

    /// Maps an unsubscribe function name to the event class it cancels.
    pub fn from_unsubscribe_name(name: &str) -> Option<Self> {
        match name {
            UNSUBSCRIBE_LEVEL1 => Some(EventClass::Level1),
            UNSUBSCRIBE_LEVEL2 => Some(EventClass::Level2),
            UNSUBSCRIBE_TRADES => Some(EventClass::Trades),
            _ => None,
        }
    }

    /// Whether streams of this class are keyed by instrument.
    pub fn is_per_instrument(self) -> bool {
        !matches!(self, EventClass::AccountEvents)
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventClass::Level1 => write!(f, "level1"),
            EventClass::Level2 => write!(f, "level2"),
            EventClass::Trades => write!(f, "trades"),
            EventClass::AccountEvents => write!(f, "account-events"),
        }
    }
}

/// Where an inbound frame goes, decided from its function name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Reply to the authentication handshake.
    Authentication,
    /// Snapshot or update for a subscription.
    Feed(EventClass),
    /// One-shot reply correlated by sequence number.
    Reply,
}

impl Route {
    pub fn for_name(name: &str) -> Self {
        match name {
            AUTHENTICATE_USER => Route::Authentication,
            SUBSCRIBE_LEVEL1 | LEVEL1_UPDATE_EVENT => Route::Feed(EventClass::Level1),
            SUBSCRIBE_LEVEL2 | LEVEL2_UPDATE_EVENT => Route::Feed(EventClass::Level2),
            SUBSCRIBE_TRADES | TRADE_DATA_UPDATE_EVENT => Route::Feed(EventClass::Trades),
            SUBSCRIBE_ACCOUNT_EVENTS => Route::Feed(EventClass::AccountEvents),
            other if ACCOUNT_EVENTS.contains(&other) => Route::Feed(EventClass::AccountEvents),
            _ => Route::Reply,
        }
    }
}

/// Reads an instrument id from a JSON number or numeric string.
pub fn instrument_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extracts the instrument id a feed payload belongs to.
pub fn feed_instrument(class: EventClass, payload: &Value) -> Option<u64> {
    match class {
        EventClass::Level1 => payload.get("InstrumentId").and_then(instrument_id),
        EventClass::Level2 => first_row_column(payload, LEVEL2_INSTRUMENT_COLUMN),
        EventClass::Trades => first_row_column(payload, TRADE_INSTRUMENT_COLUMN),
        EventClass::AccountEvents => None,
    }
}

fn first_row_column(payload: &Value, column: usize) -> Option<u64> {
    payload
        .as_array()?
        .first()?
        .as_array()?
        .get(column)
        .and_then(instrument_id)
}

// ============================================================================
// Handshake
// ============================================================================

/// Parameters for the AuthenticateUser request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateUserParams {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "APIKey")]
    pub api_key: String,
    #[serde(rename = "Nonce")]
    pub nonce: String,
    #[serde(rename = "Signature")]
    pub signature: String,
}

/// Outcome of reading an AuthenticateUser reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The gateway accepted the credentials and named the account.
    Authenticated { account_id: String },
    /// The gateway rejected the credentials or the reply was unusable.
    Rejected { reason: String },
}

impl AuthOutcome {
    pub fn from_reply(reply: &Value) -> Self {
        if reply.get("Authenticated").and_then(Value::as_bool) == Some(false) {
            let reason = reply
                .get("errormsg")
                .and_then(Value::as_str)
                .unwrap_or("authentication rejected")
                .to_string();
            return AuthOutcome::Rejected { reason };
        }

        let account_id = reply
            .get("User")
            .and_then(|user| user.get("AccountId"))
            .and_then(|id| match id {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            });

        match account_id {
            Some(account_id) => AuthOutcome::Authenticated { account_id },
            None => AuthOutcome::Rejected {
                reason: "reply carries no User.AccountId".to_string(),
            },
        }
    }
}

// ============================================================================
// Errors reported by the gateway
// ============================================================================

/// Error body carried by an Error frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub errormsg: Option<String>,
    #[serde(default)]
    pub errorcode: Option<i64>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl RemoteError {
    /// Builds an error from whatever the gateway sent, keeping raw text as the message.
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::String(text) => RemoteError {
                errormsg: Some(text.clone()),
                ..Default::default()
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| RemoteError {
                errormsg: Some(other.to_string()),
                ..Default::default()
            }),
        }
    }

    pub fn message(&self) -> &str {
        self.errormsg.as_deref().unwrap_or("unspecified error")
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errorcode {
            Some(code) => write!(f, "{} (code {})", self.message(), code)?,
            None => write!(f, "{}", self.message())?,
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}
