use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::registry::{ControlRequest, SubscriptionRegistry};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_retry::strategy::FixedInterval;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Stream session tunables
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Fixed delay between a transport failure and the next connection attempt
    pub reconnect_delay_ms: u64,
    /// How long a graceful close waits for the peer's close frame
    pub close_timeout_ms: u64,
    /// Decoded events buffered ahead of the consumer
    pub message_buffer_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 5_000,
            close_timeout_ms: 5_000,
            message_buffer_size: 1024,
        }
    }
}

impl WsConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout_ms = close_timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout_ms = connect_timeout.as_millis() as u64;
        self
    }

    pub fn with_message_buffer_size(mut self, size: usize) -> Self {
        self.message_buffer_size = size.max(1);
        self
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Lifecycle of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Open,
    ClosingGraceful,
    ErrorBackoff,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosingGraceful => "closing",
            Self::ErrorBackoff => "backoff",
        };
        f.write_str(name)
    }
}

/// One resilient streaming connection.
///
/// `connect` spawns a single driver task that owns the socket, reads and
/// decodes every frame in order, and reconnects after transport failures
/// with a fixed delay. Each time the socket opens, the full current topic set
/// of the shared [`SubscriptionRegistry`] is sent as one SUBSCRIBE batch.
///
/// The backoff is a fixed interval with no retry cap; availability wins over
/// failing fast for a long-lived feed. Exponential growth would be a
/// possible refinement, not something the session currently does.
///
/// `stop` ends the session for good: the driver closes gracefully (bounded
/// by `close_timeout_ms`) or abandons a pending connect/backoff wait, then
/// settles in `Disconnected`. Dropping the session aborts the driver so no
/// socket or timer outlives it.
pub struct StreamSession<C: WsCodec> {
    url: String,
    exchange_name: String,
    codec: Arc<C>,
    registry: Arc<SubscriptionRegistry>,
    config: WsConfig,
    state: Arc<watch::Sender<StreamState>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<C: WsCodec> fmt::Debug for StreamSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("url", &self.url)
            .field("exchange", &self.exchange_name)
            .field("state", &*self.state.borrow())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: WsCodec> StreamSession<C> {
    /// Create a session that is not yet connected
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    /// * `codec` - Encodes control frames and decodes data frames
    /// * `registry` - Topics to replay on every (re)connect
    pub fn new(
        url: String,
        exchange_name: String,
        codec: C,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        let (stop, _) = watch::channel(false);
        Self {
            url,
            exchange_name,
            codec: Arc::new(codec),
            registry,
            config: WsConfig::default(),
            state: Arc::new(state),
            stop,
            task: None,
        }
    }

    /// Set custom WebSocket configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Start the driver task; decoded events are pushed into `events`.
    ///
    /// A session connects at most once. Calling this after `stop` yields
    /// `Cancelled`.
    #[instrument(skip(self, events), fields(exchange = %self.exchange_name, url = %self.url))]
    pub fn connect(&mut self, events: mpsc::Sender<C::Message>) -> Result<(), ExchangeError> {
        if self.is_stopped() {
            return Err(ExchangeError::Cancelled);
        }
        if self.task.is_some() {
            return Err(ExchangeError::ConfigurationError(
                "Stream session is already connected".to_string(),
            ));
        }

        let driver = Driver {
            url: self.url.clone(),
            exchange_name: self.exchange_name.clone(),
            codec: self.codec.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            events,
            next_request_id: 1,
        };
        driver.transition(StreamState::Connecting);
        self.task = Some(tokio::spawn(driver.run(self.stop.subscribe())));
        Ok(())
    }

    /// Request a graceful stop; never reconnects afterwards
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            debug!(exchange = %self.exchange_name, "Stop requested");
        }
    }

    /// Stop and wait for the driver to reach `Disconnected`.
    ///
    /// If the driver does not finish within the close timeout plus a short
    /// grace period it is aborted and the state forced to `Disconnected`.
    pub async fn shutdown(&mut self) {
        self.stop();
        let Some(mut task) = self.task.take() else {
            self.state.send_replace(StreamState::Disconnected);
            return;
        };

        let bound = self.config.close_timeout() + Duration::from_secs(1);
        if timeout(bound, &mut task).await.is_err() {
            warn!(exchange = %self.exchange_name, "Stream driver did not stop in time; aborting");
            task.abort();
            self.state.send_replace(StreamState::Disconnected);
        }
    }
}

impl<C: WsCodec> Drop for StreamSession<C> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Outcome {
    Stopped,
    Failed(ExchangeError),
}

/// Resolves once a stop was requested or the session handle is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

struct Driver<C: WsCodec> {
    url: String,
    exchange_name: String,
    codec: Arc<C>,
    registry: Arc<SubscriptionRegistry>,
    config: WsConfig,
    state: Arc<watch::Sender<StreamState>>,
    events: mpsc::Sender<C::Message>,
    next_request_id: u64,
}

impl<C: WsCodec> Driver<C> {
    fn transition(&self, next: StreamState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(exchange = %self.exchange_name, from = %previous, to = %next, "Stream state changed");
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut backoff = FixedInterval::new(self.config.reconnect_delay());

        loop {
            if *stop.borrow() {
                break;
            }
            self.transition(StreamState::Connecting);

            let connected = tokio::select! {
                biased;
                () = stop_requested(&mut stop) => break,
                result = open_socket(&self.url, self.config.connect_timeout()) => result,
            };

            match connected {
                Ok(ws) => {
                    self.transition(StreamState::Open);
                    match self.pump(ws, &mut stop).await {
                        Outcome::Stopped => break,
                        Outcome::Failed(e) => {
                            warn!(exchange = %self.exchange_name, error = %e, "Stream connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(exchange = %self.exchange_name, error = %e, "Stream connection failed");
                }
            }

            self.transition(StreamState::ErrorBackoff);
            let delay = backoff
                .next()
                .unwrap_or_else(|| self.config.reconnect_delay());
            info!(exchange = %self.exchange_name, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");

            tokio::select! {
                biased;
                () = stop_requested(&mut stop) => break,
                () = sleep(delay) => {}
            }
        }

        self.transition(StreamState::Disconnected);
    }

    /// Serve one open socket until it fails or a stop is requested
    async fn pump(&mut self, ws: WsStream, stop: &mut watch::Receiver<bool>) -> Outcome {
        let (mut write, mut read) = ws.split();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let (link, replayed) = self.registry.attach(control_tx);
        debug!(exchange = %self.exchange_name, topics = replayed.len(), "Replaying subscriptions");

        let outcome = loop {
            tokio::select! {
                biased;
                () = stop_requested(stop) => break Outcome::Stopped,
                Some(request) = control_rx.recv() => {
                    if let Err(e) = self.send_control(&mut write, request).await {
                        break Outcome::Failed(e);
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        let Some(event) = self.codec.decode_message(message) else {
                            continue;
                        };
                        tokio::select! {
                            biased;
                            () = stop_requested(stop) => break Outcome::Stopped,
                            sent = self.events.send(event) => {
                                if sent.is_err() {
                                    debug!(exchange = %self.exchange_name, "Consumer dropped; closing stream");
                                    break Outcome::Stopped;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            break Outcome::Failed(ExchangeError::NetworkError(format!(
                                "Failed to send pong: {}",
                                e
                            )));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Outcome::Failed(ExchangeError::NetworkError(format!(
                            "Connection closed by peer: {:?}",
                            frame
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Outcome::Failed(ExchangeError::NetworkError(format!(
                            "WebSocket error: {}",
                            e
                        )));
                    }
                    None => {
                        break Outcome::Failed(ExchangeError::NetworkError(
                            "WebSocket stream ended".to_string(),
                        ));
                    }
                },
            }
        };

        self.registry.detach(link);
        if matches!(outcome, Outcome::Stopped) {
            self.close_gracefully(write, read).await;
        }
        outcome
    }

    async fn send_control(
        &mut self,
        write: &mut WsWrite,
        request: ControlRequest,
    ) -> Result<(), ExchangeError> {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let message = match &request {
            ControlRequest::Subscribe(topics) => self.codec.encode_subscription(topics, id)?,
            ControlRequest::Unsubscribe(topics) => self.codec.encode_unsubscription(topics, id)?,
        };
        debug!(exchange = %self.exchange_name, id, request = ?request, "Sending control frame");

        write.send(message).await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to send control frame: {}", e))
        })
    }

    async fn close_gracefully(&self, mut write: WsWrite, mut read: WsRead) {
        self.transition(StreamState::ClosingGraceful);

        if let Err(e) = write.send(Message::Close(None)).await {
            debug!(exchange = %self.exchange_name, error = %e, "Close frame not sent");
            return;
        }

        let acknowledged = timeout(self.config.close_timeout(), async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Close(_)) => return true,
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
            false
        })
        .await;

        match acknowledged {
            Ok(true) => debug!(exchange = %self.exchange_name, "Close acknowledged"),
            Ok(false) => debug!(exchange = %self.exchange_name, "Socket ended before close ack"),
            Err(_) => warn!(exchange = %self.exchange_name, "Close not acknowledged in time; tearing down"),
        }
    }
}

async fn open_socket(url: &str, connect_timeout: Duration) -> Result<WsStream, ExchangeError> {
    let (ws, _) = timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| ExchangeError::ConnectionTimeout(format!("Connecting to {} timed out", url)))?
        .map_err(|e| ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e)))?;
    Ok(ws)
}
