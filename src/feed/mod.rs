//! Realtime feed: dual SignalR hubs with automatic reconnection.
//!
//! The gateway splits realtime data across a user hub (account, orders,
//! positions, trades) and a market hub (quotes, market trades). Both share
//! one bearer token and both must be up before the feed counts as
//! subscribed; either one closing tears down the pair and re-enters the
//! backoff loop. Normalized events fan out to handlers registered per event
//! kind before `connect`.

mod error;
mod events;
mod signalr;

pub use error::{FeedError, FeedResult};
pub use events::{
    AccountEvent, EventKind, FeedEvent, Normalizer, OrderEvent, PositionEvent, QuoteEvent,
    TradeEvent,
};

use crate::config::{FeedConfig, GatewayConfig};
use crate::gateway::CredentialAuthority;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::Value;
use signalr::HubMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Feed lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

/// A subscriber callback. Handlers are registered at startup and the list is
/// snapshotted before every delivery, so registration never races fan-out.
pub type EventHandler = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Dual-hub realtime feed for one account.
pub struct RealtimeFeed {
    user_hub_url: String,
    market_hub_url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    auth: Arc<CredentialAuthority>,
    account_id: i64,
    contract_ids: Vec<String>,
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    normalizer: Mutex<Normalizer>,
    state: RwLock<FeedState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeFeed {
    /// Create a feed for one account and its watched contracts.
    pub fn new(
        gateway: &GatewayConfig,
        feed: &FeedConfig,
        auth: Arc<CredentialAuthority>,
        account_id: i64,
        contract_ids: Vec<String>,
    ) -> Self {
        Self {
            user_hub_url: gateway.user_hub_url.clone(),
            market_hub_url: gateway.market_hub_url.clone(),
            reconnect_initial: Duration::from_millis(feed.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(feed.reconnect_max_ms),
            auth,
            account_id,
            contract_ids,
            handlers: RwLock::new(HashMap::new()),
            normalizer: Mutex::new(Normalizer::new()),
            state: RwLock::new(FeedState::Disconnected),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Register a handler for an event kind. Call before `connect`.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    /// Latest cached price for a symbol.
    pub fn latest_quote(&self, symbol: &str) -> Option<Decimal> {
        self.normalizer.lock().latest_quote(symbol)
    }

    /// Start the background connection loop. Idempotent.
    pub fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let feed = Arc::clone(self);
        *task = Some(tokio::spawn(async move { feed.run_loop().await }));
    }

    /// Stop the loop and wait for it to exit. No reconnect fires after this
    /// returns; the feed is terminally stopped.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        *self.state.write() = FeedState::Stopped;
        info!("Realtime feed stopped");
    }

    async fn run_loop(&self) {
        let mut delay = self.reconnect_initial;

        while !self.shutdown.is_cancelled() {
            *self.state.write() = FeedState::Connecting;
            let subscribed = self.run_cycle().await;

            if self.shutdown.is_cancelled() {
                break;
            }
            *self.state.write() = FeedState::Disconnected;

            // A fully subscribed period resets the backoff.
            if subscribed {
                delay = self.reconnect_initial;
            }

            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to realtime hubs");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }

            if !subscribed {
                delay = next_delay(delay, self.reconnect_max);
            }
        }

        *self.state.write() = FeedState::Stopped;
    }

    /// One connect→subscribe→pump cycle. Returns whether the cycle reached a
    /// fully subscribed state before ending.
    async fn run_cycle(&self) -> bool {
        let token = match self.auth.get_token(false).await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Cannot start realtime cycle without a token");
                return false;
            }
        };

        let connect_both = async {
            tokio::try_join!(
                HubConnection::connect(&self.user_hub_url, &token.token, "user"),
                HubConnection::connect(&self.market_hub_url, &token.token, "market"),
            )
        };

        let (mut user, mut market) = tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            result = connect_both => match result {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Hub connection failed");
                    return false;
                }
            },
        };

        if let Err(e) = self.subscribe(&mut user, &mut market).await {
            error!(error = %e, "Channel subscription failed");
            return false;
        }

        *self.state.write() = FeedState::Subscribed;
        info!(account_id = self.account_id, "Realtime feed subscribed on both hubs");

        self.pump(&mut user, &mut market).await;

        user.close().await;
        market.close().await;
        true
    }

    async fn subscribe(
        &self,
        user: &mut HubConnection,
        market: &mut HubConnection,
    ) -> FeedResult<()> {
        user.invoke("SubscribeAccounts", &[]).await?;

        let account_arg = [serde_json::json!(self.account_id)];
        for target in ["SubscribeOrders", "SubscribePositions", "SubscribeTrades"] {
            user.invoke(target, &account_arg).await?;
        }

        for contract_id in &self.contract_ids {
            let contract_arg = [serde_json::json!(contract_id)];
            market.invoke("SubscribeContractQuotes", &contract_arg).await?;
            market.invoke("SubscribeContractTrades", &contract_arg).await?;
        }

        Ok(())
    }

    /// Deliver events from both hubs until either ends or shutdown fires.
    async fn pump(&self, user: &mut HubConnection, market: &mut HubConnection) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Feed shutdown requested mid-session");
                    return;
                }
                message = user.next() => {
                    if !self.on_message(user, message).await {
                        return;
                    }
                }
                message = market.next() => {
                    if !self.on_message(market, message).await {
                        return;
                    }
                }
            }
        }
    }

    /// Handle one websocket message. Returns false when the cycle must end.
    async fn on_message(
        &self,
        hub: &mut HubConnection,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> bool {
        match message {
            None => {
                warn!(hub = hub.label, "Hub stream ended");
                false
            }
            Some(Err(e)) => {
                error!(hub = hub.label, error = %e, "Hub read error");
                false
            }
            Some(Ok(Message::Text(text))) => {
                for frame in signalr::parse_frames(text.as_str()) {
                    match frame {
                        HubMessage::Ping => {
                            if hub.send_ping().await.is_err() {
                                return false;
                            }
                        }
                        HubMessage::Close { error } => {
                            warn!(hub = hub.label, ?error, "Hub sent close");
                            return false;
                        }
                        HubMessage::Invocation { target, arguments } => {
                            self.dispatch(&target, &arguments);
                        }
                        HubMessage::Other(message_type) => {
                            debug!(hub = hub.label, message_type, "Ignoring hub message");
                        }
                    }
                }
                true
            }
            Some(Ok(Message::Ping(data))) => hub.send_pong(data).await.is_ok(),
            Some(Ok(Message::Close(_))) => {
                warn!(hub = hub.label, "Hub closed by server");
                false
            }
            Some(Ok(_)) => true,
        }
    }

    /// Normalize an invocation payload and fan it out. Events that cannot be
    /// normalized are dropped with a warning; delivery never kills the loop.
    fn dispatch(&self, target: &str, arguments: &[Value]) {
        let Some(kind) = target_kind(target) else {
            debug!(hub_target = target, "Ignoring unknown hub target");
            return;
        };

        for payload in split_payloads(arguments) {
            let event = self.normalizer.lock().normalize(kind, &payload);
            match event {
                Some(event) => self.emit(&event),
                None => warn!(hub_target = target, %payload, "Dropping unnormalizable event"),
            }
        }
    }

    fn emit(&self, event: &FeedEvent) {
        let handlers = self
            .handlers
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Map a hub invocation target to its event kind.
fn target_kind(target: &str) -> Option<EventKind> {
    match target {
        "GatewayUserAccount" => Some(EventKind::Account),
        "GatewayUserOrder" => Some(EventKind::Order),
        "GatewayUserPosition" => Some(EventKind::Position),
        "GatewayUserTrade" | "GatewayTrade" => Some(EventKind::Trade),
        "GatewayQuote" => Some(EventKind::Quote),
        _ => None,
    }
}

/// Flatten invocation arguments into event payloads.
///
/// Market hub invocations arrive as `[contractId, data]` where `data` may be
/// a single object or a batch; user hub invocations carry the payload alone.
/// The contract id is folded into each payload so normalizers see one shape.
fn split_payloads(arguments: &[Value]) -> Vec<Value> {
    let contract_id = if arguments.len() >= 2 {
        arguments[0].as_str()
    } else {
        None
    };
    let data = match arguments.last() {
        Some(data) => data,
        None => return Vec::new(),
    };

    let items: Vec<Value> = match data {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };

    items
        .into_iter()
        .map(|mut item| {
            if let (Some(contract_id), Some(object)) = (contract_id, item.as_object_mut()) {
                object
                    .entry("contractId")
                    .or_insert_with(|| Value::String(contract_id.to_string()));
            }
            item
        })
        .collect()
}

/// Double the reconnect delay, capped at the configured maximum.
fn next_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

fn ws_url(hub_url: &str) -> String {
    if let Some(rest) = hub_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = hub_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        hub_url.to_string()
    }
}

/// One SignalR hub connection after a completed handshake.
struct HubConnection {
    label: &'static str,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl HubConnection {
    /// Connect, passing the bearer token at connect time, and complete the
    /// SignalR handshake.
    async fn connect(hub_url: &str, token: &str, label: &'static str) -> FeedResult<Self> {
        let url = format!("{}?access_token={token}", ws_url(hub_url));
        let (mut stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connection(format!("{label} hub: {e}")))?;

        stream
            .send(Message::text(signalr::handshake_frame()))
            .await?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    signalr::parse_handshake_response(text.as_str())
                        .map_err(|e| FeedError::Handshake(format!("{label} hub: {e}")))?;
                    debug!(hub = label, "SignalR handshake complete");
                    return Ok(Self { label, stream });
                }
                Some(Ok(Message::Ping(data))) => {
                    stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(FeedError::Connection(format!(
                        "{label} hub closed during handshake"
                    )))
                }
            }
        }
    }

    /// Send a fire-and-forget invocation.
    async fn invoke(&mut self, target: &str, arguments: &[Value]) -> FeedResult<()> {
        self.stream
            .send(Message::text(signalr::invocation_frame(target, arguments)))
            .await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> FeedResult<()> {
        self.stream
            .send(Message::text(signalr::ping_frame()))
            .await?;
        Ok(())
    }

    async fn send_pong(&mut self, data: tokio_tungstenite::tungstenite::Bytes) -> FeedResult<()> {
        self.stream.send(Message::Pong(data)).await?;
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        self.stream.next().await
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
