use crate::core::errors::ExchangeError;
use crate::core::kernel::{RestClient, SubscriptionRegistry};
use crate::exchanges::binance::rest::BinanceRestClient;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Renewal period for an open listen key
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Delay before retrying a failed renewal
pub const KEEPALIVE_RETRY_INTERVAL: Duration = Duration::from_secs(60);
/// Exchange error code for an unknown or expired listen key
pub const LISTEN_KEY_NOT_FOUND: i32 = -1125;

/// Listen key state shared with the renewal task
struct ListenKeyLease<R: RestClient + 'static> {
    rest: Arc<BinanceRestClient<R>>,
    registry: Arc<SubscriptionRegistry>,
    listen_key: Mutex<String>,
}

impl<R: RestClient + 'static> ListenKeyLease<R> {
    fn key(&self) -> MutexGuard<'_, String> {
        self.listen_key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> String {
        self.key().clone()
    }

    /// Create a fresh key and swap it for the registered one
    async fn replace(&self) -> Result<String, ExchangeError> {
        let fresh = self.rest.create_listen_key().await?;

        let stale = std::mem::replace(&mut *self.key(), fresh.clone());
        if stale != fresh {
            self.registry.remove(&stale);
        }
        self.registry.add(fresh.clone());
        info!("Listen key replaced");
        Ok(fresh)
    }
}

/// An open user-data stream.
///
/// Owns a listen key, keeps it registered as a topic on the shared registry,
/// and renews it in the background. A key the exchange no longer knows is
/// replaced with a fresh one, either by the renewal task or through
/// [`UserDataStream::renew`] after a `listenKeyExpired` event. Dropping the
/// handle stops the renewal and unregisters the topic;
/// [`UserDataStream::close`] also invalidates the key on the exchange.
pub struct UserDataStream<R: RestClient + 'static> {
    lease: Arc<ListenKeyLease<R>>,
    interval: Duration,
    retry_interval: Duration,
    keepalive: Option<JoinHandle<()>>,
}

impl<R: RestClient + 'static> fmt::Debug for UserDataStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataStream")
            .field("listen_key", &"<redacted>")
            .field("keepalive_running", &self.keepalive.is_some())
            .finish_non_exhaustive()
    }
}

impl<R: RestClient + 'static> UserDataStream<R> {
    /// Create a listen key, subscribe to it and start renewing it
    pub async fn open(
        rest: Arc<BinanceRestClient<R>>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Result<Self, ExchangeError> {
        Self::open_with_intervals(rest, registry, KEEPALIVE_INTERVAL, KEEPALIVE_RETRY_INTERVAL)
            .await
    }

    pub async fn open_with_intervals(
        rest: Arc<BinanceRestClient<R>>,
        registry: Arc<SubscriptionRegistry>,
        interval: Duration,
        retry_interval: Duration,
    ) -> Result<Self, ExchangeError> {
        let listen_key = rest.create_listen_key().await?;
        info!("User data stream opened");

        registry.add(listen_key.clone());
        let lease = Arc::new(ListenKeyLease {
            rest,
            registry,
            listen_key: Mutex::new(listen_key),
        });

        let mut stream = Self {
            lease,
            interval,
            retry_interval,
            keepalive: None,
        };
        stream.start_keepalive();
        Ok(stream)
    }

    /// Topic under which user-data events currently arrive
    pub fn listen_key(&self) -> String {
        self.lease.current()
    }

    pub fn is_keepalive_running(&self) -> bool {
        self.keepalive
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Replace the listen key after the exchange expired it.
    ///
    /// The stale topic is unsubscribed, the new one subscribed, and renewal
    /// restarts against the new key. On failure the old key stays registered
    /// and renewal keeps retrying.
    pub async fn renew(&mut self) -> Result<(), ExchangeError> {
        self.stop_keepalive();
        let result = self.lease.replace().await.map(|_| ());
        self.start_keepalive();
        result
    }

    fn start_keepalive(&mut self) {
        self.keepalive = Some(tokio::spawn(keep_alive(
            self.lease.clone(),
            self.interval,
            self.retry_interval,
        )));
    }

    fn stop_keepalive(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }

    /// Stop renewing, unsubscribe and invalidate the listen key
    pub async fn close(mut self) -> Result<(), ExchangeError> {
        self.stop_keepalive();
        let listen_key = self.lease.current();
        self.lease.registry.remove(&listen_key);
        self.lease.rest.close_listen_key(&listen_key).await?;
        info!("User data stream closed");
        Ok(())
    }
}

impl<R: RestClient + 'static> Drop for UserDataStream<R> {
    fn drop(&mut self) {
        self.stop_keepalive();
        let listen_key = self.lease.current();
        self.lease.registry.remove(&listen_key);
    }
}

async fn keep_alive<R: RestClient + 'static>(
    lease: Arc<ListenKeyLease<R>>,
    interval: Duration,
    retry_interval: Duration,
) {
    let mut delay = interval;
    loop {
        sleep(delay).await;
        let listen_key = lease.current();
        delay = match lease.rest.keep_alive_listen_key(&listen_key).await {
            Ok(()) => {
                debug!("Listen key renewed");
                interval
            }
            Err(ExchangeError::ApiError { code, .. }) if code == LISTEN_KEY_NOT_FOUND => {
                warn!("Listen key no longer known to the exchange; creating a new one");
                match lease.replace().await {
                    Ok(_) => interval,
                    Err(e) => {
                        warn!(error = %e, retry_in_secs = retry_interval.as_secs(), "Listen key replacement failed");
                        retry_interval
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in_secs = retry_interval.as_secs(), "Listen key renewal failed");
                retry_interval
            }
        };
    }
}
