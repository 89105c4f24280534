//! Session lifecycle, request correlation and subscriptions.

use crate::config::{ClientConfig, Credentials};
use crate::dispatcher::{Dispatcher, Envelope};
use crate::error::ClientError;
use crate::pending::{Completion, PendingTable};
use crate::subscription::{Listener, SubscriptionKey, SubscriptionTable};
use crate::transport::{self, Inbound, Wire};
use chrono::Utc;
use coinspro_protocol::message::{AuthenticateUserParams, AUTHENTICATE_USER};
use coinspro_protocol::{sign, Encoder, MessageType, ProtocolError, SEQUENCE_STEP};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingAuth,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAuth => "awaiting-auth",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Who the session authenticates as.
///
/// The nonce is fixed when the session is created. The account id is filled
/// in once by the handshake reply.
#[derive(Clone)]
pub struct ClientIdentity {
    credentials: Credentials,
    nonce: String,
    account_id: Arc<OnceLock<String>>,
}

impl ClientIdentity {
    pub fn new(credentials: Credentials, nonce: impl Into<String>) -> Self {
        Self {
            credentials,
            nonce: nonce.into(),
            account_id: Arc::new(OnceLock::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Account id assigned by the gateway, once authenticated.
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.get().map(String::as_str)
    }

    /// Handshake signature over nonce, user id and API key.
    pub fn signature(&self) -> Result<String, ProtocolError> {
        sign(
            &self.nonce,
            &self.credentials.user_id,
            &self.credentials.api_key,
            &self.credentials.api_secret,
        )
    }

    fn authenticate_params(&self) -> Result<AuthenticateUserParams, ProtocolError> {
        Ok(AuthenticateUserParams {
            user_id: self.credentials.user_id.clone(),
            api_key: self.credentials.api_key.clone(),
            nonce: self.nonce.clone(),
            signature: self.signature()?,
        })
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("user_id", &self.credentials.user_id)
            .field("api_key", &self.credentials.api_key)
            .field("nonce", &self.nonce)
            .field("account_id", &self.account_id())
            .finish_non_exhaustive()
    }
}

/// A request that has been sent and is awaiting its reply.
pub struct PendingReply {
    sequence: u64,
    receiver: oneshot::Receiver<Completion>,
    timeout: Option<Duration>,
    pending: Arc<PendingTable>,
}

impl PendingReply {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Waits for the reply under the session's request deadline.
    pub async fn wait(self) -> Result<Envelope, ClientError> {
        let timeout = self.timeout;
        self.wait_timeout(timeout).await
    }

    /// Waits for the reply under an explicit deadline; `None` waits until
    /// the reply arrives or the session closes.
    pub async fn wait_timeout(mut self, timeout: Option<Duration>) -> Result<Envelope, ClientError> {
        let sequence = self.sequence;
        let receiver = &mut self.receiver;

        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::debug!("Request sequence={} timed out", sequence);
                    self.pending.cancel(sequence);
                    return Err(ClientError::Timeout);
                }
            },
            None => receiver.await,
        };

        received.map_err(|_| {
            tracing::debug!("Request sequence={} channel closed", sequence);
            ClientError::SessionClosed
        })?
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // A handle dropped before its reply arrives releases the entry.
        if self.pending.cancel(self.sequence) {
            tracing::debug!("Request sequence={} abandoned", self.sequence);
        }
    }
}

struct SessionInner {
    config: ClientConfig,
    identity: ClientIdentity,
    sequence: AtomicU64,
    pending: Arc<PendingTable>,
    subscriptions: Arc<SubscriptionTable>,
    dispatcher: Dispatcher,
    state: watch::Sender<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(SEQUENCE_STEP, Ordering::SeqCst)
    }

    /// Allocates the next sequence and queues the frame for it.
    ///
    /// The outbound lock is held from allocation to send, so frames reach
    /// the wire in sequence order. `register` runs before the frame is
    /// queued and `unregister` undoes it when the send fails.
    fn send_frame<T>(
        &self,
        msg_type: MessageType,
        name: &str,
        body: &Value,
        register: impl FnOnce(u64) -> Result<T, ClientError>,
        unregister: impl FnOnce(u64),
    ) -> Result<(u64, T), ClientError> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(ClientError::NotConnected);
        };

        let sequence = self.next_sequence();
        let text = Encoder::encode_parts(msg_type, sequence, name, body)?;
        let registered = register(sequence)?;
        if tx.send(text).is_err() {
            unregister(sequence);
            return Err(ClientError::SessionClosed);
        }
        tracing::debug!("Sent {} sequence={} name={}", msg_type, sequence, name);

        Ok((sequence, registered))
    }

    /// Registers a completion, then sends the frame.
    fn request(
        &self,
        msg_type: MessageType,
        name: &str,
        body: &Value,
    ) -> Result<PendingReply, ClientError> {
        let (sequence, receiver) = self.send_frame(
            msg_type,
            name,
            body,
            |sequence| self.pending.register(sequence),
            |sequence| {
                self.pending.cancel(sequence);
            },
        )?;

        Ok(PendingReply {
            sequence,
            receiver,
            timeout: self.config.request_timeout(),
            pending: self.pending.clone(),
        })
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match *self.state.borrow() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(ClientError::SessionClosed),
            SessionState::Connecting | SessionState::AwaitingAuth => {
                Err(ClientError::NotAuthenticated)
            }
        }
    }

    fn shutdown(&self) {
        let previous = self.state.send_replace(SessionState::Closed);
        self.outbound.lock().take();
        let failed = self.pending.fail_all(|| ClientError::SessionClosed);
        self.subscriptions.clear();
        if previous != SessionState::Closed {
            tracing::info!(
                "Session closed from {} ({} pending requests failed)",
                previous,
                failed
            );
        }
    }
}

/// One authenticated connection to the gateway.
///
/// Cloning a session yields another handle to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session. Nothing is sent until [`Session::start`].
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let nonce = Utc::now().timestamp_millis().to_string();
        let identity = ClientIdentity::new(config.credentials.clone(), nonce);
        let pending = Arc::new(PendingTable::new());
        let subscriptions = Arc::new(SubscriptionTable::new());
        let dispatcher = Dispatcher::new(
            pending.clone(),
            subscriptions.clone(),
            identity.account_id.clone(),
        );
        let (state, _) = watch::channel(SessionState::Connecting);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                identity,
                sequence: AtomicU64::new(0),
                pending,
                subscriptions,
                dispatcher,
                state,
                outbound: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        })
    }

    /// Connects to the configured gateway and authenticates.
    ///
    /// Returns the handshake reply.
    pub async fn start(&self) -> Result<Envelope, ClientError> {
        if self.state() != SessionState::Connecting {
            return Err(ClientError::AlreadyStarted);
        }

        let wire = match transport::connect(&self.inner.config).await {
            Ok(wire) => wire,
            Err(e) => {
                self.inner.shutdown();
                return Err(e);
            }
        };
        self.start_on(wire).await
    }

    /// Authenticates over an already open wire.
    pub async fn start_on(&self, wire: Wire) -> Result<Envelope, ClientError> {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::AwaitingAuth;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ClientError::AlreadyStarted);
        }

        let Wire { outbound, inbound } = wire;
        *self.inner.outbound.lock() = Some(outbound);
        let handle = tokio::spawn(read_loop(Arc::downgrade(&self.inner), inbound));
        *self.inner.reader.lock() = Some(handle);

        tracing::debug!("Authenticating as user {}...", self.inner.identity.user_id());
        let result = self.authenticate().await;

        match result {
            Ok(reply) => {
                let ready = self.inner.state.send_if_modified(|state| {
                    if *state == SessionState::AwaitingAuth {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if !ready {
                    return Err(ClientError::SessionClosed);
                }
                tracing::info!(
                    "Session ready (account {})",
                    self.account_id().unwrap_or_default()
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!("Handshake failed: {}", e);
                self.close();
                Err(e)
            }
        }
    }

    async fn authenticate(&self) -> Result<Envelope, ClientError> {
        let params = self.inner.identity.authenticate_params()?;
        let body = serde_json::to_value(params)?;
        self.inner
            .request(MessageType::Request, AUTHENTICATE_USER, &body)?
            .wait()
            .await
    }

    /// Sends a request and waits for its reply.
    pub async fn call(&self, name: &str, body: Value) -> Result<Envelope, ClientError> {
        self.submit(name, &body)?.wait().await
    }

    /// Sends a request and returns a handle for its reply.
    pub fn submit(&self, name: &str, body: &Value) -> Result<PendingReply, ClientError> {
        self.inner.ensure_ready()?;
        self.inner.request(MessageType::Request, name, body)
    }

    /// Registers `listener` for a feed and sends the subscribe frame.
    ///
    /// A second subscription under the same key replaces the first listener;
    /// the subscribe frame is sent either way. Returns the frame's sequence.
    pub fn subscribe(
        &self,
        name: &str,
        body: Value,
        listener: Listener,
    ) -> Result<u64, ClientError> {
        self.inner.ensure_ready()?;

        let key = SubscriptionKey::for_subscribe(name, &body)
            .ok_or_else(|| ClientError::UnsupportedSubscription(name.to_string()))?;
        if key.class.is_per_instrument() && key.instrument.is_none() {
            return Err(ClientError::UnsupportedSubscription(format!(
                "{} without InstrumentId",
                name
            )));
        }

        let subscriptions = &self.inner.subscriptions;
        let (sequence, replaced) = self.inner.send_frame(
            MessageType::SubscribeToEvent,
            name,
            &body,
            |_| Ok(subscriptions.insert(key, listener)),
            |_| {
                subscriptions.remove(&key);
            },
        )?;
        if replaced {
            tracing::debug!("Replaced listener for {}", key);
        }
        tracing::debug!("Subscribed {} sequence={}", key, sequence);

        Ok(sequence)
    }

    /// Subscribes and returns the feed as a channel.
    pub fn subscribe_channel(
        &self,
        name: &str,
        body: Value,
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Arc::new(move |envelope: &Envelope| {
            let _ = tx.send(envelope.clone());
        });
        self.subscribe(name, body, listener)?;
        Ok(rx)
    }

    /// Drops the listener for a feed and asks the gateway to stop it.
    pub async fn unsubscribe(&self, name: &str, body: Value) -> Result<Envelope, ClientError> {
        self.inner.ensure_ready()?;

        let key = SubscriptionKey::for_unsubscribe(name, &body)
            .ok_or_else(|| ClientError::UnsupportedSubscription(name.to_string()))?;
        if !self.inner.subscriptions.remove(&key) {
            tracing::debug!("No listener registered for {}", key);
        }

        self.inner
            .request(MessageType::UnsubscribeFromEvent, name, &body)?
            .wait()
            .await
    }

    /// Closes the session. Outstanding requests fail with `SessionClosed`.
    pub fn close(&self) {
        self.inner.shutdown();
        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.identity
    }

    pub fn account_id(&self) -> Option<&str> {
        self.inner.identity.account_id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns the number of registered subscription listeners.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("identity", &self.inner.identity)
            .finish()
    }
}

/// Dispatches inbound frames until the wire closes or fails.
async fn read_loop(session: Weak<SessionInner>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    tracing::debug!("read_loop started");

    while let Some(event) = inbound.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };

        let dispatched = match event {
            Inbound::Text(text) => inner.dispatcher.dispatch_text(&text),
            Inbound::Binary(bytes) => inner.dispatcher.dispatch_bytes(&bytes),
            Inbound::Closed(reason) => {
                tracing::debug!("read_loop: connection closed ({:?})", reason);
                inner.shutdown();
                return;
            }
            Inbound::Failed(e) => {
                tracing::warn!("read_loop: transport failed: {}", e);
                inner.shutdown();
                return;
            }
        };

        if let Err(e) = dispatched {
            tracing::warn!("read_loop: undecodable frame, closing session: {}", e);
            inner.shutdown();
            return;
        }
    }

    tracing::debug!("read_loop: inbound channel closed");
    if let Some(inner) = session.upgrade() {
        inner.shutdown();
    }
}
