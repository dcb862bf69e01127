/// Transport kernel shared by the exchange glue
///
/// The kernel holds no exchange-specific parsing. It knows how to sign and
/// send a REST call, how to keep one streaming socket alive, and how to hand
/// decoded frames to a caller. What a frame means is decided by a [`WsCodec`].
///
/// # Architecture
///
/// ## Authentication
/// - `Signer`: pluggable request authentication
/// - `HmacSigner`: HMAC-SHA256 over the canonical query string
/// - `Clock`: timestamp source, swappable for a `FixedClock` in tests
///
/// ## Transport
/// - `RestClient`: one-shot HTTP calls, never retried
/// - `StreamSession`: connect / receive / back off / reconnect state machine
/// - `SubscriptionRegistry`: the topic set replayed on every open
///
/// ## Delivery
/// - `WsCodec`: exchange-specific frame encoding and decoding
/// - `StreamConsumer`: lazy, cancellable sequence of decoded events
///
/// # Streaming Example
/// ```rust,no_run
/// use binance_monitor::core::kernel::*;
/// use binance_monitor::exchanges::binance::codec::BinanceCodec;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(SubscriptionRegistry::with_topics(["btcusdt@kline_1d"]));
/// let session = StreamSession::new(
///     "wss://stream.binance.com:9443/ws".to_string(),
///     "binance".to_string(),
///     BinanceCodec,
///     registry.clone(),
/// );
/// let mut consumer = StreamConsumer::new(session);
///
/// // Topics added later are subscribed live
/// registry.add("ethusdt@kline_1h");
///
/// let event = consumer.next_event().await?;
/// println!("{:?}", event);
/// consumer.cancel().await;
/// # Ok(())
/// # }
/// ```
///
/// # REST Example
/// ```rust,no_run
/// use binance_monitor::core::kernel::*;
/// use reqwest::Method;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credential = Credential::new("api_key".to_string(), "secret".to_string())?;
/// let rest = RestClientBuilder::new(RestClientConfig::new(
///     "https://api.binance.com".to_string(),
///     "binance".to_string(),
/// ))
/// .with_signer(Arc::new(HmacSigner::new(credential)))
/// .build()?;
///
/// let account = rest.execute_value(Method::GET, "/api/v3/account", &[], true).await?;
/// println!("{}", account);
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod consumer;
pub mod registry;
pub mod rest;
pub mod signer;
pub mod ws;

// Re-export key types for convenience
pub use codec::WsCodec;
pub use consumer::StreamConsumer;
pub use registry::{ControlRequest, SubscriptionRegistry};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, API_KEY_HEADER};
pub use signer::{Clock, Credential, FixedClock, HmacSigner, SignedRequest, Signer, SystemClock};
pub use ws::{StreamSession, StreamState, WsConfig};
