use axum::{
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use binance_monitor::core::errors::ExchangeError;
use binance_monitor::core::kernel::{
    Credential, FixedClock, HmacSigner, ReqwestRest, RestClientBuilder, RestClientConfig,
    API_KEY_HEADER,
};
use binance_monitor::exchanges::binance::{BinanceRestClient, TradeQuery};
use serde_json::json;
use std::sync::{Arc, Mutex};

const API_KEY: &str = "test_api_key";
const API_SECRET: &str = "test_secret_key";
const TIMESTAMP: u64 = 1_700_000_000_000;

/// What the mock saw for one request
#[derive(Debug, Clone)]
struct Seen {
    query: Option<String>,
    api_key: Option<String>,
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    fn record(&self, query: Option<String>, headers: &HeaderMap) {
        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(Seen { query, api_key });
    }

    fn all(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn invalid_symbol(
    State(recorder): State<Recorder>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    recorder.record(query, &headers);
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "code": -1121, "msg": "Invalid symbol." })),
    )
}

async fn account(
    State(recorder): State<Recorder>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    recorder.record(query, &headers);
    Json(json!({
        "canTrade": true,
        "canWithdraw": true,
        "canDeposit": true,
        "updateTime": 123456789,
        "accountType": "SPOT",
        "balances": [
            { "asset": "BTC", "free": "0.50000000", "locked": "0.10000000" },
            { "asset": "USDT", "free": "0.00000000", "locked": "0.00000000" }
        ],
        "permissions": ["SPOT"]
    }))
}

async fn gateway_down() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "upstream unavailable")
}

async fn wrong_schema() -> impl IntoResponse {
    Json(json!({ "serverTime": "not-a-number" }))
}

async fn listen_key(
    State(recorder): State<Recorder>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    recorder.record(query, &headers);
    Json(json!({ "listenKey": "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1" }))
}

async fn empty_object(
    State(recorder): State<Recorder>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    recorder.record(query, &headers);
    Json(json!({}))
}

/// Serve `router` on an ephemeral port and return its base URL
async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn signed_client(base_url: String) -> BinanceRestClient<ReqwestRest> {
    let credential = Credential::new(API_KEY.to_string(), API_SECRET.to_string()).unwrap();
    let signer = HmacSigner::new(credential).with_clock(Arc::new(FixedClock(TIMESTAMP)));
    let rest = RestClientBuilder::new(
        RestClientConfig::new(base_url, "binance".to_string()).with_timeout(5),
    )
    .with_signer(Arc::new(signer))
    .build()
    .unwrap();
    BinanceRestClient::new(rest)
}

#[cfg(test)]
mod rest_tests {
    use super::*;

    #[tokio::test]
    async fn test_my_trades_invalid_symbol_is_api_error() {
        let recorder = Recorder::default();
        let router = Router::new()
            .route("/api/v3/myTrades", get(invalid_symbol))
            .with_state(recorder.clone());
        let client = signed_client(spawn_mock(router).await);

        let result = client
            .get_my_trades("BTCUSDT", &TradeQuery::default())
            .await;

        match result {
            Err(ExchangeError::ApiError { code, message }) => {
                assert_eq!(code, -1121);
                assert_eq!(message, "Invalid symbol.");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signed_query_is_what_was_signed() {
        let recorder = Recorder::default();
        let router = Router::new()
            .route("/api/v3/myTrades", get(invalid_symbol))
            .with_state(recorder.clone());
        let client = signed_client(spawn_mock(router).await);

        let _ = client
            .get_my_trades("BTCUSDT", &TradeQuery::default().from_id(42).limit(5))
            .await;

        let seen = recorder.all();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].api_key.as_deref(), Some(API_KEY));

        let query = seen[0].query.clone().unwrap();
        let (payload, signature) = query.split_once("&signature=").unwrap();
        assert_eq!(
            payload,
            format!("symbol=BTCUSDT&fromId=42&limit=5&timestamp={}", TIMESTAMP)
        );

        let credential = Credential::new(API_KEY.to_string(), API_SECRET.to_string()).unwrap();
        assert_eq!(signature, credential.sign(payload).unwrap());
    }

    #[tokio::test]
    async fn test_account_snapshot() {
        let recorder = Recorder::default();
        let router = Router::new()
            .route("/api/v3/account", get(account))
            .with_state(recorder.clone());
        let client = signed_client(spawn_mock(router).await);

        let account = client.get_account().await.unwrap();
        let held: Vec<_> = account
            .non_empty_balances()
            .map(|b| b.asset.clone())
            .collect();
        assert_eq!(held, vec!["BTC".to_string()]);
        assert_eq!(account.balances[0].total().to_string(), "0.60000000");

        let query = recorder.all()[0].query.clone().unwrap();
        assert!(query.starts_with(&format!("timestamp={}&signature=", TIMESTAMP)));
    }

    #[tokio::test]
    async fn test_unstructured_error_keeps_raw_body() {
        let router = Router::new()
            .route("/api/v3/account", get(gateway_down))
            .with_state(Recorder::default());
        let client = signed_client(spawn_mock(router).await);

        match client.get_account().await {
            Err(ExchangeError::ApiError { code, message }) => {
                assert_eq!(code, 502);
                assert_eq!(message, "upstream unavailable");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_deserialization_error() {
        let router = Router::new()
            .route("/api/v3/time", get(wrong_schema))
            .with_state(Recorder::default());
        let client = signed_client(spawn_mock(router).await);

        let result = client.server_time().await;
        assert!(matches!(
            result,
            Err(ExchangeError::DeserializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_listen_key_calls_are_unsigned_but_keyed() {
        let recorder = Recorder::default();
        let router = Router::new()
            .route(
                "/api/v3/userDataStream",
                post(listen_key).put(empty_object).delete(empty_object),
            )
            .with_state(recorder.clone());
        let client = signed_client(spawn_mock(router).await);

        let key = client.create_listen_key().await.unwrap();
        client.keep_alive_listen_key(&key).await.unwrap();
        client.close_listen_key(&key).await.unwrap();

        let seen = recorder.all();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|s| s.api_key.as_deref() == Some(API_KEY)));
        assert_eq!(seen[0].query, None);
        assert_eq!(seen[1].query, Some(format!("listenKey={}", key)));
        assert_eq!(seen[2].query, Some(format!("listenKey={}", key)));
        println!("✅ listen key lifecycle: {} calls", seen.len());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = signed_client(format!("http://{}", addr));
        let result = client.server_time().await;
        assert!(matches!(result, Err(ExchangeError::HttpError(_))));
    }
}
