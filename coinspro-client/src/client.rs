//! High-level client API.

use crate::config::ClientConfig;
use crate::dispatcher::Envelope;
use crate::error::ClientError;
use crate::session::Session;
use coinspro_protocol::message::*;
use coinspro_protocol::RemoteError;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn code(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Order type codes accepted by `SendOrder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
    TrailingStopMarket,
    TrailingStopLimit,
    BlockTrade,
}

impl OrderType {
    pub fn code(self) -> u8 {
        match self {
            OrderType::Market => 1,
            OrderType::Limit => 2,
            OrderType::StopMarket => 3,
            OrderType::StopLimit => 4,
            OrderType::TrailingStopMarket => 5,
            OrderType::TrailingStopLimit => 6,
            OrderType::BlockTrade => 7,
        }
    }

    /// Name used by `GetOrderFee`.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
            OrderType::StopMarket => "StopMarket",
            OrderType::StopLimit => "StopLimit",
            OrderType::TrailingStopMarket => "TrailingStopMarket",
            OrderType::TrailingStopLimit => "TrailingStopLimit",
            OrderType::BlockTrade => "BlockTrade",
        }
    }
}

impl Serialize for OrderType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Parameters of a `SendOrder` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewOrder {
    pub instrument_id: u64,
    pub quantity: f64,
    pub side: Side,
    pub order_type: OrderType,
    pub client_order_id: u64,
    pub display_quantity: f64,
    pub use_display_quantity: bool,
    /// 1 good-till-cancel, 3 immediate-or-cancel, 4 fill-or-kill.
    pub time_in_force: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_offset: Option<f64>,
    #[serde(rename = "OrderIdOCO", skip_serializing_if = "Option::is_none")]
    pub order_id_oco: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peg_price_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
}

impl NewOrder {
    pub fn market(instrument_id: u64, quantity: f64) -> Self {
        Self {
            instrument_id,
            quantity,
            side: Side::Buy,
            order_type: OrderType::Market,
            client_order_id: 0,
            display_quantity: 0.0,
            use_display_quantity: true,
            time_in_force: 1,
            limit_price: None,
            limit_offset: None,
            order_id_oco: None,
            peg_price_type: None,
            trailing_amount: None,
            stop_price: None,
        }
    }

    pub fn limit(instrument_id: u64, quantity: f64, price: f64) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            ..Self::market(instrument_id, quantity)
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_client_order_id(mut self, id: u64) -> Self {
        self.client_order_id = id;
        self
    }

    pub fn with_time_in_force(mut self, time_in_force: u8) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn with_stop_price(mut self, price: f64) -> Self {
        self.stop_price = Some(price);
        self
    }
}

/// Parameters of a `GetOrderFee` request.
#[derive(Debug, Clone)]
pub struct OrderFeeQuery {
    pub instrument_id: u64,
    pub product_id: u64,
    pub amount: f64,
    pub order_type: OrderType,
    /// "Maker" or "Taker".
    pub maker_taker: String,
}

/// Paging window for deposit and withdraw ticket listings.
#[derive(Debug, Clone, Copy)]
pub struct TicketQuery {
    pub limit: u64,
    pub start_index: u64,
    pub operator_id: u64,
}

impl TicketQuery {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            start_index: 0,
            operator_id: 1,
        }
    }
}

/// High-level client for the Coins Pro gateway.
pub struct Client {
    session: Session,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            session: Session::new(config)?,
        })
    }

    /// Wraps an existing session.
    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    /// Connects and authenticates. Returns the handshake reply body.
    pub async fn connect(&self) -> Result<Value, ClientError> {
        let reply = self.session.start().await?;
        Ok(reply.payload.into_value())
    }

    /// Returns the underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.session.close()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn oms_id(&self) -> u64 {
        self.session.config().oms_id
    }

    /// Account id as the gateway expects it: a number when it is numeric.
    fn account_id(&self) -> Result<Value, ClientError> {
        let id = self
            .session
            .account_id()
            .ok_or(ClientError::NotAuthenticated)?;
        Ok(numeric_or_string(id))
    }

    fn user_id(&self) -> Value {
        numeric_or_string(self.session.identity().user_id())
    }

    async fn request(&self, name: &str, params: Value) -> Result<Value, ClientError> {
        let reply = self.session.call(name, params).await?;
        let payload = reply.payload.into_value();

        if payload.get("result").and_then(Value::as_bool) == Some(false) {
            return Err(ClientError::Remote {
                name: name.to_string(),
                error: RemoteError::from_payload(&payload),
            });
        }

        Ok(payload)
    }

    async fn account_request(&self, name: &str, extra: Value) -> Result<Value, ClientError> {
        let mut params = json!({
            "OMSId": self.oms_id(),
            "AccountId": self.account_id()?,
        });
        merge(&mut params, extra);
        self.request(name, params).await
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the gateway.
    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.request(PING, json!({})).await
    }

    // =========================================================================
    // Market data
    // =========================================================================

    /// Lists tradable instruments.
    pub async fn get_instruments(&self) -> Result<Value, ClientError> {
        self.request("GetInstruments", json!({ "OMSId": self.oms_id() }))
            .await
    }

    /// Lists products (assets).
    pub async fn get_products(&self) -> Result<Value, ClientError> {
        self.request("GetProducts", json!({ "OMSId": self.oms_id() }))
            .await
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    pub async fn get_user_accounts(&self) -> Result<Value, ClientError> {
        self.request("GetUserAccounts", json!({ "OMSId": self.oms_id() }))
            .await
    }

    pub async fn get_account_positions(&self) -> Result<Value, ClientError> {
        self.account_request("GetAccountPositions", json!({})).await
    }

    pub async fn get_account_trades(
        &self,
        start_index: u64,
        count: u64,
    ) -> Result<Value, ClientError> {
        self.account_request(
            "GetAccountTrades",
            json!({ "StartIndex": start_index, "Count": count }),
        )
        .await
    }

    pub async fn get_account_transactions(
        &self,
        start_index: u64,
        count: u64,
    ) -> Result<Value, ClientError> {
        self.account_request(
            "GetAccountTransactions",
            json!({ "StartIndex": start_index, "Count": count }),
        )
        .await
    }

    // =========================================================================
    // Order operations
    // =========================================================================

    /// Submits an order.
    pub async fn send_order(&self, order: &NewOrder) -> Result<Value, ClientError> {
        self.account_request("SendOrder", serde_json::to_value(order)?)
            .await
    }

    /// Submits an order on the buy side.
    pub async fn buy(&self, order: NewOrder) -> Result<Value, ClientError> {
        self.send_order(&order.with_side(Side::Buy)).await
    }

    /// Submits an order on the sell side.
    pub async fn sell(&self, order: NewOrder) -> Result<Value, ClientError> {
        self.send_order(&order.with_side(Side::Sell)).await
    }

    pub async fn cancel_order(&self, order_id: u64) -> Result<Value, ClientError> {
        self.account_request("CancelOrder", json!({ "OrderId": order_id }))
            .await
    }

    pub async fn get_order_status(&self, order_id: u64) -> Result<Value, ClientError> {
        self.account_request("GetOrderStatus", json!({ "OrderId": order_id }))
            .await
    }

    pub async fn get_order_fee(&self, query: &OrderFeeQuery) -> Result<Value, ClientError> {
        self.account_request(
            "GetOrderFee",
            json!({
                "InstrumentId": query.instrument_id,
                "ProductId": query.product_id,
                "Amount": query.amount,
                "OrderType": query.order_type.as_str(),
                "MakerTaker": query.maker_taker,
            }),
        )
        .await
    }

    pub async fn get_order_history(&self, depth: u64) -> Result<Value, ClientError> {
        self.account_request("GetOrderHistory", json!({ "Depth": depth }))
            .await
    }

    pub async fn get_open_orders(&self) -> Result<Value, ClientError> {
        self.account_request("GetOpenOrders", json!({})).await
    }

    // =========================================================================
    // Deposits and withdrawals
    // =========================================================================

    pub async fn get_deposit_tickets(&self, query: TicketQuery) -> Result<Value, ClientError> {
        self.account_request("GetDepositTickets", ticket_params(query))
            .await
    }

    pub async fn get_withdraw_tickets(&self, query: TicketQuery) -> Result<Value, ClientError> {
        self.account_request("GetWithdrawTickets", ticket_params(query))
            .await
    }

    pub async fn get_withdraw_ticket(&self, request_code: &str) -> Result<Value, ClientError> {
        self.account_request("GetWithdrawTicket", json!({ "RequestCode": request_code }))
            .await
    }

    pub async fn create_withdraw_ticket(
        &self,
        product_id: u64,
        amount: f64,
    ) -> Result<Value, ClientError> {
        self.account_request(
            "CreateWithdrawTicket",
            json!({ "ProductId": product_id, "Amount": amount }),
        )
        .await
    }

    // =========================================================================
    // API keys
    // =========================================================================

    pub async fn get_user_api_keys(&self) -> Result<Value, ClientError> {
        self.request("GetUserAPIKeys", json!({ "UserId": self.user_id() }))
            .await
    }

    pub async fn add_user_api_key(&self, permissions: &[&str]) -> Result<Value, ClientError> {
        self.request(
            "AddUserAPIKey",
            json!({ "UserId": self.user_id(), "Permissions": permissions }),
        )
        .await
    }

    pub async fn remove_user_api_key(&self, api_key: &str) -> Result<Value, ClientError> {
        self.request(
            "RemoveUserAPIKey",
            json!({ "UserId": self.user_id(), "ApiKey": api_key }),
        )
        .await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to best bid/offer updates for an instrument.
    pub fn subscribe_level1(
        &self,
        instrument_id: u64,
    ) -> Result<UnboundedReceiver<Envelope>, ClientError> {
        self.session.subscribe_channel(
            SUBSCRIBE_LEVEL1,
            json!({ "OMSId": self.oms_id(), "InstrumentId": instrument_id }),
        )
    }

    /// Subscribes to order book updates for an instrument.
    pub fn subscribe_level2(
        &self,
        instrument_id: u64,
        depth: u64,
    ) -> Result<UnboundedReceiver<Envelope>, ClientError> {
        self.session.subscribe_channel(
            SUBSCRIBE_LEVEL2,
            json!({
                "OMSId": self.oms_id(),
                "InstrumentId": instrument_id,
                "Depth": depth,
            }),
        )
    }

    /// Subscribes to public trades for an instrument.
    pub fn subscribe_trades(
        &self,
        instrument_id: u64,
        include_last_count: u64,
    ) -> Result<UnboundedReceiver<Envelope>, ClientError> {
        self.session.subscribe_channel(
            SUBSCRIBE_TRADES,
            json!({
                "OMSId": self.oms_id(),
                "InstrumentId": instrument_id,
                "IncludeLastCount": include_last_count,
            }),
        )
    }

    /// Subscribes to the authenticated account's events.
    pub fn subscribe_account_events(&self) -> Result<UnboundedReceiver<Envelope>, ClientError> {
        self.session.subscribe_channel(
            SUBSCRIBE_ACCOUNT_EVENTS,
            json!({ "OMSId": self.oms_id(), "AccountId": self.account_id()? }),
        )
    }

    pub async fn unsubscribe_level1(&self, instrument_id: u64) -> Result<Value, ClientError> {
        self.unsubscribe(UNSUBSCRIBE_LEVEL1, instrument_id).await
    }

    pub async fn unsubscribe_level2(&self, instrument_id: u64) -> Result<Value, ClientError> {
        self.unsubscribe(UNSUBSCRIBE_LEVEL2, instrument_id).await
    }

    pub async fn unsubscribe_trades(&self, instrument_id: u64) -> Result<Value, ClientError> {
        self.unsubscribe(UNSUBSCRIBE_TRADES, instrument_id).await
    }

    async fn unsubscribe(&self, name: &str, instrument_id: u64) -> Result<Value, ClientError> {
        let reply = self
            .session
            .unsubscribe(
                name,
                json!({ "OMSId": self.oms_id(), "InstrumentId": instrument_id }),
            )
            .await?;
        Ok(reply.payload.into_value())
    }
}

fn numeric_or_string(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => json!(n),
        Err(_) => json!(id),
    }
}

fn ticket_params(query: TicketQuery) -> Value {
    json!({
        "Limit": query.limit,
        "StartIndex": query.start_index,
        "OperatorId": query.operator_id,
    })
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}
