use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, ReqwestRest, RestClientBuilder, RestClientConfig, StreamConsumer, StreamSession,
    SubscriptionRegistry, WsConfig,
};
use crate::exchanges::binance::codec::BinanceCodec;
use crate::exchanges::binance::rest::BinanceRestClient;
use std::sync::Arc;

pub const EXCHANGE_NAME: &str = "binance";

/// Build the REST client; attaches a signer when the config carries credentials
pub fn build_rest_client(
    config: &ExchangeConfig,
) -> Result<BinanceRestClient<ReqwestRest>, ExchangeError> {
    let rest_config = RestClientConfig::new(config.rest_endpoint(), EXCHANGE_NAME.to_string());
    let mut rest_builder = RestClientBuilder::new(rest_config);

    if config.has_credentials() {
        let signer = Arc::new(HmacSigner::new(config.credential()?));
        rest_builder = rest_builder.with_signer(signer);
    }

    Ok(BinanceRestClient::new(rest_builder.build()?))
}

/// Build the REST client, failing fast when credentials are missing
pub fn build_authenticated_rest_client(
    config: &ExchangeConfig,
) -> Result<BinanceRestClient<ReqwestRest>, ExchangeError> {
    config.credential()?;
    build_rest_client(config)
}

/// Build a stream session for the configured stream endpoint
pub fn build_stream_session(
    config: &ExchangeConfig,
    registry: Arc<SubscriptionRegistry>,
    ws_config: WsConfig,
) -> StreamSession<BinanceCodec> {
    StreamSession::new(
        config.stream_endpoint(),
        EXCHANGE_NAME.to_string(),
        BinanceCodec,
        registry,
    )
    .with_config(ws_config)
}

/// Build a lazy consumer; nothing connects until the first event is pulled
pub fn build_stream_consumer(
    config: &ExchangeConfig,
    registry: Arc<SubscriptionRegistry>,
) -> StreamConsumer<BinanceCodec> {
    StreamConsumer::new(build_stream_session(
        config,
        registry,
        WsConfig::default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TESTNET_STREAM_URL;
    use crate::core::kernel::StreamState;

    #[test]
    fn test_authenticated_client_requires_credentials() {
        let result = build_authenticated_rest_client(&ExchangeConfig::read_only());
        assert!(matches!(result, Err(ExchangeError::ConfigError(_))));
    }

    #[test]
    fn test_read_only_rest_client_builds() {
        let client = build_rest_client(&ExchangeConfig::read_only().testnet(true)).unwrap();
        assert_eq!(
            client.inner().config().base_url,
            "https://testnet.binance.vision"
        );
    }

    #[test]
    fn test_consumer_is_lazy() {
        let registry = Arc::new(SubscriptionRegistry::with_topics(["btcusdt@kline_1d"]));
        let consumer =
            build_stream_consumer(&ExchangeConfig::read_only().testnet(true), registry);

        assert!(!consumer.is_started());
        assert_eq!(consumer.state(), StreamState::Disconnected);
    }

    #[test]
    fn test_session_uses_stream_endpoint() {
        let session = build_stream_session(
            &ExchangeConfig::read_only().testnet(true),
            Arc::new(SubscriptionRegistry::new()),
            WsConfig::default(),
        );
        assert_eq!(session.url(), TESTNET_STREAM_URL);
    }
}
