use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use zeroize::ZeroizeOnDrop;

type HmacSha256 = Hmac<Sha256>;

/// Source of request timestamps in epoch milliseconds.
///
/// Injected into the signer so signatures can be reproduced in tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

/// Clock frozen at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0
    }
}

/// API key and secret pair used to authenticate REST calls.
///
/// The secret is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Credential {
    api_key: String,
    api_secret: Box<[u8]>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(api_key: String, api_secret: String) -> Result<Self, ConfigError> {
        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential("api key"));
        }
        if api_secret.is_empty() {
            return Err(ConfigError::MissingCredential("api secret"));
        }

        Ok(Self {
            api_key,
            api_secret: api_secret.into_bytes().into_boxed_slice(),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC-SHA256 of `message`, lowercase hex encoded
    pub fn sign(&self, message: &str) -> Result<String, ExchangeError> {
        if self.api_secret.is_empty() {
            return Err(ExchangeError::ConfigurationError(
                "Cannot sign with an empty secret".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(&self.api_secret).map_err(|e| {
            ExchangeError::ConfigurationError(format!("Invalid secret key: {}", e))
        })?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// A request whose query string is ready to be transmitted.
///
/// `payload()` is exactly the byte string that was signed, and
/// `query_string()` is that payload followed by the signature, so what is
/// signed is what is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    pub path: String,
    /// Caller parameters in insertion order
    pub params: Vec<(String, String)>,
    pub timestamp: Option<u64>,
    pub signature: Option<String>,
}

impl SignedRequest {
    /// Request carrying only the caller's params
    pub fn unsigned(method: Method, path: &str, params: &[(&str, &str)]) -> Self {
        Self {
            method,
            path: path.to_string(),
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            timestamp: None,
            signature: None,
        }
    }

    /// Canonical `key=value&...` serialization of params plus timestamp
    pub fn payload(&self) -> String {
        let mut pairs: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if let Some(timestamp) = self.timestamp {
            pairs.push(format!("timestamp={}", timestamp));
        }
        pairs.join("&")
    }

    /// Full query string including the trailing signature, if any
    pub fn query_string(&self) -> String {
        let payload = self.payload();
        match &self.signature {
            Some(signature) if payload.is_empty() => format!("signature={}", signature),
            Some(signature) => format!("{}&signature={}", payload, signature),
            None => payload,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Request authentication seam used by the REST client
pub trait Signer: Send + Sync {
    /// Key sent in the `X-MBX-APIKEY` header
    fn api_key(&self) -> &str;

    /// Serialize `params` and, when `signed`, append a timestamp and signature.
    ///
    /// Unsigned requests are returned with their params untouched.
    fn sign_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<SignedRequest, ExchangeError>;
}

/// HMAC-SHA256 signer for Binance spot endpoints
pub struct HmacSigner {
    credential: Credential,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, e.g. with a [`FixedClock`] in tests
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Signer for HmacSigner {
    fn api_key(&self) -> &str {
        self.credential.api_key()
    }

    fn sign_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<SignedRequest, ExchangeError> {
        let mut request = SignedRequest::unsigned(method, path, params);
        if !signed {
            return Ok(request);
        }

        request.timestamp = Some(self.clock.now_millis());
        request.signature = Some(self.credential.sign(&request.payload())?);
        Ok(request)
    }
}
