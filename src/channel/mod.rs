/// Cross-context request/response and notification channel
///
/// Two execution contexts that can only exchange text (a host page and an
/// embedded chart frame, two processes over a websocket, ...) talk through
/// envelopes tagged with a provider id. Unrelated traffic on the same
/// transport is ignored.
pub mod envelope;
pub mod transport;
pub mod websocket;

pub use envelope::{Direction, Envelope};
pub use transport::{Endpoint, MemoryTransport, Transport};
pub use websocket::WebSocketTransport;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};

pub const DEFAULT_PROVIDER_ID: &str = "TradingView";

/// Handler for inbound requests and notifications
///
/// Handlers run to completion before the next inbound envelope is
/// dispatched, so a handler must not await a response arriving on the same
/// channel; spawn a task for that instead.
pub type Handler =
    Arc<dyn Fn(Value, Responder) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |data: Value, responder: Responder| -> BoxFuture<'static, Result<()>> {
        Box::pin(f(data, responder))
    })
}

#[derive(Clone)]
struct ReplyRoute {
    target: Arc<dyn Transport>,
    id: u64,
    name: String,
    client_id: Option<String>,
    provider: Arc<str>,
}

/// Reply capability handed to a handler
///
/// For requests every `reply` call sends one response envelope; calls are
/// not deduplicated. For notifications it is a no-op.
#[derive(Clone)]
pub struct Responder {
    route: Option<ReplyRoute>,
}

impl Responder {
    fn noop() -> Self {
        Responder { route: None }
    }

    pub fn reply(&self, result: Value) -> Result<()> {
        let Some(route) = &self.route else {
            return Ok(());
        };

        let envelope = Envelope::response(
            route.id,
            &route.name,
            route.client_id.clone(),
            result,
            &route.provider,
        );
        route.target.post(envelope.encode()?)
    }

    /// True when replies go nowhere (the envelope was a notification)
    pub fn is_noop(&self) -> bool {
        self.route.is_none()
    }
}

/// Response to an outstanding request
///
/// Resolves with the response payload. It never resolves if no response
/// arrives; it fails with [`BridgeError::ChannelClosed`] only when the
/// channel itself is dropped first.
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Value>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| BridgeError::ChannelClosed))
    }
}

type PendingKey = (String, u64);

/// Message channel instance: handler table, pending calls and id counters
#[derive(Clone)]
pub struct MessageChannel {
    provider: Arc<str>,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    pending: Arc<Mutex<HashMap<PendingKey, oneshot::Sender<Value>>>>,
    next_call_id: Arc<AtomicU64>,
    next_post_id: Arc<AtomicU64>,
}

impl MessageChannel {
    pub fn new(provider: impl Into<String>) -> Self {
        let provider: String = provider.into();
        MessageChannel {
            provider: Arc::from(provider.as_str()),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_call_id: Arc::new(AtomicU64::new(0)),
            next_post_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Install the handler for `name`, replacing any previous one
    pub async fn register(&self, name: &str, handler: Handler) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(name.to_string(), handler).is_some() {
            debug!("Replaced handler for message: {}", name);
        } else {
            debug!("Registered handler for message: {}", name);
        }
    }

    /// Bind a client id and an outbound target
    pub fn client(
        &self,
        client_id: impl Into<String>,
        target: Arc<dyn Transport>,
    ) -> ChannelClient {
        ChannelClient {
            channel: self.clone(),
            client_id: client_id.into(),
            target,
        }
    }

    /// Number of requests still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Dispatch inbound text from `inbound` in arrival order until it ends
    ///
    /// Responses to requests go back through `reply_to`.
    pub fn listen(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        reply_to: Arc<dyn Transport>,
    ) -> JoinHandle<()> {
        let channel = self.clone();

        tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                channel.handle_inbound(&text, &reply_to).await;
            }
            debug!("Inbound stream for provider {} ended", channel.provider);
        })
    }

    /// Process one inbound text message
    ///
    /// Malformed text, foreign providers, unhandled names and unmatched
    /// responses are dropped without error.
    pub async fn handle_inbound(&self, text: &str, reply_to: &Arc<dyn Transport>) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping malformed message: {}", e);
                return;
            }
        };

        if !envelope.is_from(&self.provider) {
            return;
        }

        debug!(
            "Inbound {} '{}' (id {})",
            envelope.direction.as_str(),
            envelope.name,
            envelope.id
        );

        match envelope.direction {
            Direction::Get => {
                let Some(handler) = self.handler_for(&envelope.name).await else {
                    debug!("No handler registered for request: {}", envelope.name);
                    return;
                };

                let responder = Responder {
                    route: Some(ReplyRoute {
                        target: Arc::clone(reply_to),
                        id: envelope.id,
                        name: envelope.name.clone(),
                        client_id: envelope.client_id,
                        provider: Arc::clone(&self.provider),
                    }),
                };

                Self::run_handler(&envelope.name, handler, envelope.data, responder).await;
            }
            Direction::Post => {
                let Some(handler) = self.handler_for(&envelope.name).await else {
                    debug!("No handler registered for notification: {}", envelope.name);
                    return;
                };

                Self::run_handler(&envelope.name, handler, envelope.data, Responder::noop()).await;
            }
            Direction::On => {
                let key = (envelope.client_id.unwrap_or_default(), envelope.id);
                let sink = {
                    let mut pending = self.pending.lock().await;
                    pending.remove(&key)
                };

                match sink {
                    Some(tx) => {
                        // Receiver may be gone if the caller stopped waiting
                        let _ = tx.send(envelope.data);
                    }
                    None => {
                        debug!("Dropping unmatched response {} for client {}", key.1, key.0);
                    }
                }
            }
        }
    }

    async fn handler_for(&self, name: &str) -> Option<Handler> {
        let handlers = self.handlers.read().await;
        handlers.get(name).cloned()
    }

    async fn run_handler(name: &str, handler: Handler, data: Value, responder: Responder) {
        if let Err(e) = handler(data, responder).await {
            error!("Handler for '{}' failed: {} ({})", name, e, e.error_code());
        }
    }

    fn next_post_id(&self) -> u64 {
        self.next_post_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Sending side of a [`MessageChannel`] for one client id
#[derive(Clone)]
pub struct ChannelClient {
    channel: MessageChannel,
    client_id: String,
    target: Arc<dyn Transport>,
}

impl ChannelClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    /// Send a request; the returned future resolves when the response arrives
    pub async fn request(&self, name: &str, data: Value) -> Result<PendingResponse> {
        let id = self.channel.next_call_id.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope::request(id, name, data, &self.client_id, &self.channel.provider);
        let text = envelope.encode()?;

        let (tx, rx) = oneshot::channel();
        let key = (self.client_id.clone(), id);

        // Register before sending so an immediate reply finds its entry
        self.channel.pending.lock().await.insert(key.clone(), tx);

        if let Err(e) = self.target.post(text) {
            self.channel.pending.lock().await.remove(&key);
            warn!("Request '{}' could not be sent: {}", name, e);
            return Err(e);
        }

        debug!("Sent request '{}' (id {}, client {})", name, id, self.client_id);
        Ok(PendingResponse { id, rx })
    }

    /// Send a notification to the bound target
    pub fn notify(&self, name: &str, data: Value) -> Result<()> {
        self.notify_to(self.target.as_ref(), name, data)
    }

    /// Send a notification to an explicit target
    pub fn notify_to(&self, target: &dyn Transport, name: &str, data: Value) -> Result<()> {
        let id = self.channel.next_post_id();
        let envelope = Envelope::notify(id, name, data, &self.channel.provider);
        target.post(envelope.encode()?)?;
        debug!("Sent notification '{}' (id {})", name, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{timeout, Duration};

    fn as_transport(t: &Arc<MemoryTransport>) -> Arc<dyn Transport> {
        Arc::clone(t) as Arc<dyn Transport>
    }

    /// Host and frame channels wired over an in-memory pair
    fn wired() -> (MessageChannel, ChannelClient, MessageChannel, ChannelClient) {
        let (host_end, frame_end) = MemoryTransport::pair();
        let host_out = as_transport(&host_end.transport);
        let frame_out = as_transport(&frame_end.transport);

        let host = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let frame = MessageChannel::new(DEFAULT_PROVIDER_ID);
        host.listen(host_end.inbound, Arc::clone(&host_out));
        frame.listen(frame_end.inbound, Arc::clone(&frame_out));

        let host_client = host.client("tradingview_host", host_out);
        let frame_client = frame.client("tradingview_frame", frame_out);
        (host, host_client, frame, frame_client)
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let (host, host_client, frame, _) = wired();

        frame
            .register("echo", handler(|data, responder: Responder| async move {
                responder.reply(json!({ "echo": data }))
            }))
            .await;

        let pending = host_client.request("echo", json!(42)).await.unwrap();
        let response = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();

        assert_eq!(response, json!({ "echo": 42 }));
        assert_eq!(host.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_handler_may_reply_after_async_work() {
        let (_, host_client, frame, _) = wired();

        frame
            .register("slow", handler(|_, responder: Responder| async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = responder.reply(json!("done"));
                });
                Ok(())
            }))
            .await;

        let pending = host_client.request("slow", Value::Null).await.unwrap();
        let response = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert_eq!(response, json!("done"));
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let (_, host_client, _, _) = wired();

        let first = host_client.request("a", Value::Null).await.unwrap();
        let second = host_client.request("b", Value::Null).await.unwrap();
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn test_notification_reaches_handler_with_noop_responder() {
        let (_, host_client, frame, _) = wired();
        let (tx, mut rx) = mpsc::unbounded_channel();

        frame
            .register("changeSymbol", handler(move |data, responder: Responder| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((data, responder.is_noop()));
                    responder.reply(json!("ignored"))
                }
            }))
            .await;

        host_client.notify("changeSymbol", json!({"symbol": "AAPL"})).unwrap();

        let (data, noop) = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(data["symbol"], "AAPL");
        assert!(noop);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let (_, host_client, frame, _) = wired();

        frame
            .register("who", handler(|_, r: Responder| async move { r.reply(json!("first")) }))
            .await;
        frame
            .register("who", handler(|_, r: Responder| async move { r.reply(json!("second")) }))
            .await;

        let pending = host_client.request("who", Value::Null).await.unwrap();
        let response = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert_eq!(response, json!("second"));
    }

    #[tokio::test]
    async fn test_unmatched_and_duplicate_responses_are_dropped() {
        let channel = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let (end, mut peer) = MemoryTransport::pair();
        let out = as_transport(&end.transport);
        let client = channel.client("c1", Arc::clone(&out));

        let pending = client.request("ping", Value::Null).await.unwrap();
        let id = pending.id();
        let _sent = peer.inbound.recv().await.unwrap();

        // Unknown id: nothing happens
        let stray =
            Envelope::response(id + 100, "ping", Some("c1".into()), json!(1), DEFAULT_PROVIDER_ID);
        channel.handle_inbound(&stray.encode().unwrap(), &out).await;
        assert_eq!(channel.pending_count().await, 1);

        let reply =
            Envelope::response(id, "ping", Some("c1".into()), json!("pong"), DEFAULT_PROVIDER_ID);
        let text = reply.encode().unwrap();
        channel.handle_inbound(&text, &out).await;
        assert_eq!(channel.pending_count().await, 0);
        assert_eq!(pending.await.unwrap(), json!("pong"));

        // Already consumed: still nothing
        channel.handle_inbound(&text, &out).await;
        assert_eq!(channel.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_messages_are_ignored() {
        let channel = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let (end, mut peer) = MemoryTransport::pair();
        let out = as_transport(&end.transport);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        channel
            .register("ping", handler(move |_, r: Responder| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { r.reply(json!("pong")) }
            }))
            .await;

        let foreign = Envelope::request(0, "ping", Value::Null, "c", "SomeoneElse");
        channel.handle_inbound(&foreign.encode().unwrap(), &out).await;
        channel.handle_inbound("{not json", &out).await;
        channel.handle_inbound(r#"{"id":0,"type":"get","name":"ping"}"#, &out).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ours = Envelope::request(7, "ping", Value::Null, "c", DEFAULT_PROVIDER_ID);
        channel.handle_inbound(&ours.encode().unwrap(), &out).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reply = Envelope::decode(&peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply.direction, Direction::On);
        assert_eq!(reply.id, 7);
        assert_eq!(reply.client_id.as_deref(), Some("c"));
        assert_eq!(reply.data, json!("pong"));
    }

    #[tokio::test]
    async fn test_double_reply_sends_twice() {
        let channel = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let (end, mut peer) = MemoryTransport::pair();
        let out = as_transport(&end.transport);

        channel
            .register("twice", handler(|_, r: Responder| async move {
                r.reply(json!(1))?;
                r.reply(json!(2))
            }))
            .await;

        let req = Envelope::request(1, "twice", Value::Null, "c", DEFAULT_PROVIDER_ID);
        channel.handle_inbound(&req.encode().unwrap(), &out).await;

        let first = Envelope::decode(&peer.inbound.recv().await.unwrap()).unwrap();
        let second = Envelope::decode(&peer.inbound.recv().await.unwrap()).unwrap();
        assert_eq!((first.id, second.id), (1, 1));
        assert_eq!((first.data, second.data), (json!(1), json!(2)));
    }

    #[tokio::test]
    async fn test_handlers_run_in_arrival_order() {
        let (_, host_client, frame, _) = wired();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let log = Arc::clone(&seen);
        frame
            .register("step", handler(move |data, _| {
                let log = Arc::clone(&log);
                let done_tx = done_tx.clone();
                async move {
                    // The first step is the slowest; order must still hold
                    if data == json!(0) {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                    }
                    log.lock().await.push(data);
                    let _ = done_tx.send(());
                    Ok(())
                }
            }))
            .await;

        for i in 0..3 {
            host_client.notify("step", json!(i)).unwrap();
        }
        for _ in 0..3 {
            timeout(Duration::from_secs(1), done_rx.recv()).await.unwrap();
        }

        assert_eq!(*seen.lock().await, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_channels_do_not_share_state() {
        let a = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let b = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let (end, _peer) = MemoryTransport::pair();
        let out = as_transport(&end.transport);

        let _pending = a.client("c", Arc::clone(&out)).request("x", Value::Null).await.unwrap();
        assert_eq!(a.pending_count().await, 1);
        assert_eq!(b.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_no_pending_call() {
        let channel = MessageChannel::new(DEFAULT_PROVIDER_ID);
        let (end, peer) = MemoryTransport::pair();
        drop(peer);

        let client = channel.client("c", as_transport(&end.transport));
        assert!(client.request("x", Value::Null).await.is_err());
        assert_eq!(channel.pending_count().await, 0);
    }
}
