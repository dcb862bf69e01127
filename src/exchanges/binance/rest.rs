use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::exchanges::binance::types::{
    BinanceAccountInfo, BinanceListenKey, BinanceServerTime, BinanceTrade,
};
use reqwest::Method;
use serde_json::Value;
use tracing::instrument;

const ACCOUNT: &str = "/api/v3/account";
const MY_TRADES: &str = "/api/v3/myTrades";
const USER_DATA_STREAM: &str = "/api/v3/userDataStream";
const SERVER_TIME: &str = "/api/v3/time";

/// Filters for `GET /api/v3/myTrades`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeQuery {
    pub from_id: Option<u64>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub limit: Option<u32>,
}

impl TradeQuery {
    pub fn from_id(mut self, from_id: u64) -> Self {
        self.from_id = Some(from_id);
        self
    }

    pub fn time_range(mut self, start_time: u64, end_time: u64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Optional params in the order they are signed and sent
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(from_id) = self.from_id {
            params.push(("fromId", from_id.to_string()));
        }
        if let Some(start_time) = self.start_time {
            params.push(("startTime", start_time.to_string()));
        }
        if let Some(end_time) = self.end_time {
            params.push(("endTime", end_time.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

/// Thin typed wrapper around `RestClient` for the Binance spot API
#[derive(Debug, Clone)]
pub struct BinanceRestClient<R: RestClient> {
    client: R,
}

impl<R: RestClient> BinanceRestClient<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &R {
        &self.client
    }

    /// Get account information with balances
    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<BinanceAccountInfo, ExchangeError> {
        self.client.execute(Method::GET, ACCOUNT, &[], true).await
    }

    /// Get the account's fills for one symbol
    #[instrument(skip(self))]
    pub async fn get_my_trades(
        &self,
        symbol: &str,
        query: &TradeQuery,
    ) -> Result<Vec<BinanceTrade>, ExchangeError> {
        if symbol.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "myTrades requires a symbol".to_string(),
            ));
        }

        let optional = query.to_params();
        let mut params = vec![("symbol", symbol)];
        params.extend(optional.iter().map(|(k, v)| (*k, v.as_str())));

        self.client.execute(Method::GET, MY_TRADES, &params, true).await
    }

    /// Open a user-data stream and return its listen key
    #[instrument(skip(self))]
    pub async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let response: BinanceListenKey = self
            .client
            .execute(Method::POST, USER_DATA_STREAM, &[], false)
            .await?;
        Ok(response.listen_key)
    }

    /// Extend a listen key's validity by 60 minutes
    #[instrument(skip(self, listen_key))]
    pub async fn keep_alive_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let _: Value = self
            .client
            .execute(
                Method::PUT,
                USER_DATA_STREAM,
                &[("listenKey", listen_key)],
                false,
            )
            .await?;
        Ok(())
    }

    /// Invalidate a listen key
    #[instrument(skip(self, listen_key))]
    pub async fn close_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let _: Value = self
            .client
            .execute(
                Method::DELETE,
                USER_DATA_STREAM,
                &[("listenKey", listen_key)],
                false,
            )
            .await?;
        Ok(())
    }

    /// Exchange server time in epoch milliseconds
    pub async fn server_time(&self) -> Result<u64, ExchangeError> {
        let response: BinanceServerTime = self
            .client
            .execute(Method::GET, SERVER_TIME, &[], false)
            .await?;
        Ok(response.server_time)
    }
}
