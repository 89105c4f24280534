//! Inbound frame classification and routing.
//!
//! Every inbound frame is resolved synchronously, in arrival order, to
//! exactly one of:
//! - a fired pending request (one-shot replies, the handshake, error frames)
//! - a delivery to the subscription listener for its key (feeds)
//! - a discard (no pending request, no extractable instrument)

use crate::error::ClientError;
use crate::pending::PendingTable;
use crate::subscription::{SubscriptionKey, SubscriptionTable};
use chrono::{DateTime, Utc};
use coinspro_protocol::message::{feed_instrument, AuthOutcome};
use coinspro_protocol::{
    Decoder, EventClass, Frame, MessageType, Payload, ProtocolError, RemoteError, Route,
};
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// A decoded inbound frame.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Message type code of the frame.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Sequence number of the frame.
    pub sequence: u64,
    /// Function or event name; lets account-event listeners tell events apart.
    pub name: String,
    /// Parsed payload, or the raw text when it is not JSON.
    pub payload: Payload,
    /// Local time the frame was dispatched; unset when the payload is raw text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn from_frame(frame: Frame) -> Self {
        let payload = Payload::parse(&frame.payload);
        let received_at = (!payload.is_raw()).then(Utc::now);
        Self {
            msg_type: frame.msg_type,
            sequence: frame.sequence,
            name: frame.name,
            payload,
            received_at,
        }
    }
}

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pending request with this sequence was fired.
    Completed { sequence: u64 },
    /// The frame was offered to the subscription under `key`.
    Delivered {
        key: SubscriptionKey,
        listeners: usize,
    },
    /// Nothing wanted the frame.
    Discarded,
}

/// Routes inbound frames to the pending and subscription tables.
pub struct Dispatcher {
    pending: Arc<PendingTable>,
    subscriptions: Arc<SubscriptionTable>,
    account_id: Arc<OnceLock<String>>,
}

impl Dispatcher {
    pub fn new(
        pending: Arc<PendingTable>,
        subscriptions: Arc<SubscriptionTable>,
        account_id: Arc<OnceLock<String>>,
    ) -> Self {
        Self {
            pending,
            subscriptions,
            account_id,
        }
    }

    /// Decodes and dispatches one text message.
    ///
    /// Only an undecodable envelope is an error; the caller should drop the
    /// connection when it sees one.
    pub fn dispatch_text(&self, text: &str) -> Result<DispatchOutcome, ProtocolError> {
        let frame = Decoder::decode(text)?;
        Ok(self.dispatch(frame))
    }

    /// Decodes and dispatches one binary message holding UTF-8 text.
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> Result<DispatchOutcome, ProtocolError> {
        let frame = Decoder::decode_bytes(bytes)?;
        Ok(self.dispatch(frame))
    }

    /// Dispatches one decoded frame.
    pub fn dispatch(&self, frame: Frame) -> DispatchOutcome {
        let is_error = frame.is_error();
        let envelope = Envelope::from_frame(frame);
        tracing::debug!(
            "dispatch: {} sequence={} name={}",
            envelope.msg_type,
            envelope.sequence,
            envelope.name
        );

        if is_error {
            return self.fail(envelope);
        }

        match Route::for_name(&envelope.name) {
            Route::Authentication => self.authenticate(envelope),
            Route::Feed(class) => self.deliver(class, envelope),
            Route::Reply => self.complete(envelope.sequence, Ok(envelope)),
        }
    }

    fn authenticate(&self, envelope: Envelope) -> DispatchOutcome {
        let outcome = match &envelope.payload {
            Payload::Json(reply) => AuthOutcome::from_reply(reply),
            Payload::Raw(text) => AuthOutcome::Rejected {
                reason: text.clone(),
            },
        };

        let sequence = envelope.sequence;
        match outcome {
            AuthOutcome::Authenticated { account_id } => {
                if self.account_id.set(account_id.clone()).is_err() {
                    tracing::debug!("dispatch: account id already set, ignoring {}", account_id);
                }
                self.complete(sequence, Ok(envelope))
            }
            AuthOutcome::Rejected { reason } => {
                tracing::warn!("dispatch: authentication rejected: {}", reason);
                self.complete(sequence, Err(ClientError::AuthenticationFailed(reason)))
            }
        }
    }

    fn deliver(&self, class: EventClass, envelope: Envelope) -> DispatchOutcome {
        let instrument = match envelope.payload.as_json() {
            Some(payload) => feed_instrument(class, payload),
            None => None,
        };

        if class.is_per_instrument() && instrument.is_none() {
            tracing::debug!(
                "dispatch: no instrument in {} sequence={}, discarding",
                envelope.name,
                envelope.sequence
            );
            return DispatchOutcome::Discarded;
        }

        let key = SubscriptionKey::new(class, instrument);
        let listeners = self.subscriptions.deliver(&key, &envelope);
        DispatchOutcome::Delivered { key, listeners }
    }

    fn fail(&self, envelope: Envelope) -> DispatchOutcome {
        let error = RemoteError::from_payload(&envelope.payload.clone().into_value());
        let sequence = envelope.sequence;
        let outcome = self.complete(
            sequence,
            Err(ClientError::Remote {
                name: envelope.name,
                error,
            }),
        );
        if outcome == DispatchOutcome::Discarded {
            tracing::warn!("dispatch: error frame for unknown sequence={}", sequence);
        }
        outcome
    }

    fn complete(
        &self,
        sequence: u64,
        result: Result<Envelope, ClientError>,
    ) -> DispatchOutcome {
        if self.pending.complete(sequence, result) {
            DispatchOutcome::Completed { sequence }
        } else {
            tracing::debug!("dispatch: no pending request for sequence={}", sequence);
            DispatchOutcome::Discarded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinspro_protocol::message::ACCOUNT_EVENTS;
    use coinspro_protocol::Encoder;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Harness {
        pending: Arc<PendingTable>,
        subscriptions: Arc<SubscriptionTable>,
        account_id: Arc<OnceLock<String>>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let pending = Arc::new(PendingTable::new());
        let subscriptions = Arc::new(SubscriptionTable::new());
        let account_id = Arc::new(OnceLock::new());
        let dispatcher = Dispatcher::new(pending.clone(), subscriptions.clone(), account_id.clone());
        Harness {
            pending,
            subscriptions,
            account_id,
            dispatcher,
        }
    }

    fn text(msg_type: MessageType, sequence: u64, name: &str, payload: &str) -> String {
        Encoder::encode(&Frame::new(msg_type, sequence, name, payload)).unwrap()
    }

    fn recorder(subscriptions: &SubscriptionTable, key: SubscriptionKey) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        subscriptions.insert(
            key,
            Arc::new(move |envelope: &Envelope| sink.lock().push(envelope.clone())),
        );
        seen
    }

    #[tokio::test]
    async fn test_reply_completes_pending() {
        let h = harness();
        let rx = h.pending.register(4).unwrap();

        let outcome = h
            .dispatcher
            .dispatch_text(&text(MessageType::Reply, 4, "GetProducts", r#"[{"ProductId":1}]"#))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Completed { sequence: 4 });

        let envelope = rx.await.unwrap().unwrap();
        assert_eq!(envelope.name, "GetProducts");
        assert_eq!(envelope.payload, Payload::Json(json!([{"ProductId": 1}])));
    }

    #[test]
    fn test_duplicate_reply_fires_once() {
        let h = harness();
        let _rx = h.pending.register(4).unwrap();
        let frame = text(MessageType::Reply, 4, "GetProducts", "[]");

        assert_eq!(
            h.dispatcher.dispatch_text(&frame).unwrap(),
            DispatchOutcome::Completed { sequence: 4 }
        );
        assert_eq!(
            h.dispatcher.dispatch_text(&frame).unwrap(),
            DispatchOutcome::Discarded
        );
    }

    #[test]
    fn test_unmatched_reply_discarded() {
        let h = harness();
        let _rx = h.pending.register(2).unwrap();

        let outcome = h
            .dispatcher
            .dispatch_text(&text(MessageType::Reply, 98, "Ping", r#"{"msg":"PONG"}"#))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Discarded);
        assert!(h.pending.contains(2));
    }

    #[tokio::test]
    async fn test_raw_reply_body_passes_through() {
        let h = harness();
        let rx = h.pending.register(6).unwrap();

        h.dispatcher
            .dispatch_text(&text(MessageType::Reply, 6, "GetOrderFee", "Endpoint Not Found"))
            .unwrap();
        let envelope = rx.await.unwrap().unwrap();
        assert_eq!(envelope.payload, Payload::Raw("Endpoint Not Found".to_string()));
        assert!(envelope.received_at.is_none());
    }

    #[test]
    fn test_receipt_time_only_on_parsed_payload() {
        let parsed = Envelope::from_frame(Frame::new(MessageType::Reply, 2, "Ping", r#"{"msg":"PONG"}"#));
        assert!(parsed.received_at.is_some());
        let json = serde_json::to_value(&parsed).unwrap();
        assert!(json.get("received_at").is_some());

        let raw = Envelope::from_frame(Frame::new(MessageType::Reply, 2, "Ping", "PONG"));
        assert!(raw.received_at.is_none());
        let json = serde_json::to_value(&raw).unwrap();
        assert!(json.get("received_at").is_none());
        assert_eq!(json["payload"], "PONG");
    }

    #[tokio::test]
    async fn test_binary_message_dispatches() {
        let h = harness();
        let rx = h.pending.register(8).unwrap();

        let frame = text(MessageType::Reply, 8, "GetProducts", "[]");
        assert_eq!(
            h.dispatcher.dispatch_bytes(frame.as_bytes()).unwrap(),
            DispatchOutcome::Completed { sequence: 8 }
        );
        assert!(rx.await.unwrap().is_ok());

        assert!(matches!(
            h.dispatcher.dispatch_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_authentication_sets_account_id() {
        let h = harness();
        let rx = h.pending.register(0).unwrap();

        h.dispatcher
            .dispatch_text(&text(
                MessageType::Reply,
                0,
                "AuthenticateUser",
                r#"{"Authenticated":true,"User":{"AccountId":42,"UserId":7}}"#,
            ))
            .unwrap();

        assert_eq!(h.account_id.get().map(String::as_str), Some("42"));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_authentication_rejected() {
        let h = harness();
        let rx = h.pending.register(0).unwrap();

        h.dispatcher
            .dispatch_text(&text(
                MessageType::Reply,
                0,
                "AuthenticateUser",
                r#"{"Authenticated":false,"errormsg":"Invalid signature"}"#,
            ))
            .unwrap();

        assert!(h.account_id.get().is_none());
        assert!(matches!(
            rx.await.unwrap(),
            Err(ClientError::AuthenticationFailed(reason)) if reason == "Invalid signature"
        ));
    }

    #[test]
    fn test_account_id_set_once() {
        let h = harness();
        let first = text(MessageType::Reply, 0, "AuthenticateUser", r#"{"User":{"AccountId":42}}"#);
        let second = text(MessageType::Reply, 0, "AuthenticateUser", r#"{"User":{"AccountId":99}}"#);
        h.dispatcher.dispatch_text(&first).unwrap();
        h.dispatcher.dispatch_text(&second).unwrap();
        assert_eq!(h.account_id.get().map(String::as_str), Some("42"));
    }

    #[test]
    fn test_level1_routes_by_instrument_field() {
        let h = harness();
        let six = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::Level1, Some(6)));
        let seven = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::Level1, Some(7)));

        h.dispatcher
            .dispatch_text(&text(MessageType::Reply, 2, "SubscribeLevel1", r#"{"InstrumentId":6,"BestBid":1.0}"#))
            .unwrap();
        h.dispatcher
            .dispatch_text(&text(MessageType::Event, 4, "Level1UpdateEvent", r#"{"InstrumentId":6,"BestBid":1.1}"#))
            .unwrap();

        assert_eq!(six.lock().len(), 2);
        assert!(seven.lock().is_empty());
    }

    #[test]
    fn test_level2_routes_by_column_seven() {
        let h = harness();
        let six = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::Level2, Some(6)));
        let one = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::Level2, Some(1)));

        let outcome = h
            .dispatcher
            .dispatch_text(&text(
                MessageType::Event,
                8,
                "Level2UpdateEvent",
                "[[1,1,1598000000,0,500000.0,1,500000.0,6,0.25,0]]",
            ))
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                key: SubscriptionKey::new(EventClass::Level2, Some(6)),
                listeners: 1
            }
        );
        assert_eq!(six.lock().len(), 1);
        assert!(one.lock().is_empty());
    }

    #[test]
    fn test_trades_route_by_column_one() {
        let h = harness();
        let six = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::Trades, Some(6)));

        h.dispatcher
            .dispatch_text(&text(
                MessageType::Event,
                10,
                "TradeDataUpdateEvent",
                "[[9001,6,0.01,500000.0,11,12,1598000000,0,0,0]]",
            ))
            .unwrap();
        h.dispatcher
            .dispatch_text(&text(
                MessageType::Event,
                12,
                "TradeDataUpdateEvent",
                "[[9002,7,0.01,500000.0,11,12,1598000000,0,0,0]]",
            ))
            .unwrap();

        assert_eq!(six.lock().len(), 1);
    }

    #[test]
    fn test_feed_without_instrument_discarded() {
        let h = harness();
        let outcome = h
            .dispatcher
            .dispatch_text(&text(MessageType::Reply, 2, "SubscribeLevel2", "[]"))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Discarded);
    }

    #[test]
    fn test_account_events_share_one_key() {
        let h = harness();
        let seen = recorder(&h.subscriptions, SubscriptionKey::new(EventClass::AccountEvents, None));

        for (i, name) in ACCOUNT_EVENTS.iter().enumerate() {
            h.dispatcher
                .dispatch_text(&text(MessageType::Event, i as u64 * 2, name, r#"{"AccountId":42}"#))
                .unwrap();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), ACCOUNT_EVENTS.len());
        let names: Vec<&str> = seen.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ACCOUNT_EVENTS.to_vec());
    }

    #[test]
    fn test_feed_with_no_listener_delivers_to_zero() {
        let h = harness();
        let outcome = h
            .dispatcher
            .dispatch_text(&text(MessageType::Event, 2, "Level1UpdateEvent", r#"{"InstrumentId":3}"#))
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                key: SubscriptionKey::new(EventClass::Level1, Some(3)),
                listeners: 0
            }
        );
    }

    #[tokio::test]
    async fn test_error_frame_fails_pending() {
        let h = harness();
        let rx = h.pending.register(14).unwrap();

        h.dispatcher
            .dispatch_text(&text(
                MessageType::Error,
                14,
                "SendOrder",
                r#"{"result":false,"errormsg":"Not Authorized","errorcode":20}"#,
            ))
            .unwrap();

        match rx.await.unwrap() {
            Err(ClientError::Remote { name, error }) => {
                assert_eq!(name, "SendOrder");
                assert_eq!(error.errorcode, Some(20));
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_envelope_is_error() {
        let h = harness();
        assert!(h.dispatcher.dispatch_text("{not json").is_err());
    }
}
