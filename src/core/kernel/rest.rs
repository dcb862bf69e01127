use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{SignedRequest, Signer};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, trace};

/// Header carrying the API key on every call
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// REST client trait for one-shot HTTP calls
///
/// Calls are never retried here; the caller decides what to do with an error.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Execute a request and return the raw JSON body
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `endpoint` - The API endpoint path
    /// * `params` - Query parameters in the order they must be signed and sent
    /// * `signed` - Whether to append timestamp and signature
    async fn execute_value(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<Value, ExchangeError>;

    /// Execute a request and deserialize the body into `T`
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let value = self.execute_value(method, endpoint, params, signed).await?;
        serde_json::from_value(value).map_err(|e| {
            ExchangeError::DeserializationError(format!(
                "Failed to deserialize {} response: {}",
                endpoint, e
            ))
        })
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: concat!("binance-monitor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| {
                ExchangeError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i32,
    msg: String,
}

impl ReqwestRest {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    fn build_url(&self, request: &SignedRequest) -> String {
        let query = request.query_string();
        if query.is_empty() {
            format!("{}{}", self.config.base_url, request.path)
        } else {
            format!("{}{}?{}", self.config.base_url, request.path, query)
        }
    }

    fn prepare(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<SignedRequest, ExchangeError> {
        match &self.signer {
            Some(signer) => signer.sign_request(method, endpoint, params, signed),
            None if signed => Err(ExchangeError::ConfigurationError(format!(
                "{} requires credentials but none are configured",
                endpoint
            ))),
            None => Ok(SignedRequest::unsigned(method, endpoint, params)),
        }
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let response_text = response.text().await?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            serde_json::from_str(&response_text).map_err(|e| {
                ExchangeError::DeserializationError(format!("Failed to parse JSON response: {}", e))
            })
        } else {
            Err(parse_error_body(status.as_u16(), response_text))
        }
    }
}

/// Map a failed response body to `ApiError`, keeping the raw text if it is not `{code, msg}`
fn parse_error_body(status: u16, body: String) -> ExchangeError {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(error) => ExchangeError::ApiError {
            code: error.code,
            message: error.msg,
        },
        Err(_) => ExchangeError::ApiError {
            code: i32::from(status),
            message: body,
        },
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, params), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint, signed = signed))]
    async fn execute_value(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<Value, ExchangeError> {
        let request = self.prepare(method, endpoint, params, signed)?;
        let url = self.build_url(&request);

        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(signer) = &self.signer {
            builder = builder.header(API_KEY_HEADER, signer.api_key());
        }

        let response = builder.send().await?;
        self.handle_response(response).await
    }
}
