use anyhow::Context;
use binance_monitor::core::config::{ConfigError, ExchangeConfig};
use binance_monitor::core::kernel::SubscriptionRegistry;
use binance_monitor::core::types::{kline_topic, KlineInterval};
use binance_monitor::exchanges::binance::{
    build_authenticated_rest_client, build_stream_consumer, StreamEvent, TradeQuery,
    UserDataStream,
};
use std::sync::Arc;
use tracing::{info, warn};

const ENV_PREFIX: &str = "BINANCE";

#[cfg(feature = "env-file")]
fn load_config() -> Result<ExchangeConfig, ConfigError> {
    ExchangeConfig::from_env_file(ENV_PREFIX)
}

#[cfg(not(feature = "env-file"))]
fn load_config() -> Result<ExchangeConfig, ConfigError> {
    ExchangeConfig::from_env(ENV_PREFIX)
}

fn report(event: &StreamEvent) {
    match event {
        StreamEvent::Kline(kline) => info!(
            symbol = %kline.symbol,
            interval = %kline.kline.interval,
            open = %kline.kline.open_price,
            close = %kline.kline.close_price,
            closed = kline.kline.closed,
            "Kline"
        ),
        StreamEvent::AccountPosition(position) => {
            for balance in &position.balances {
                info!(asset = %balance.asset, free = %balance.free, locked = %balance.locked, "Balance changed");
            }
        }
        StreamEvent::BalanceUpdate(update) => {
            info!(asset = %update.asset, delta = %update.delta, "Balance update");
        }
        StreamEvent::ExecutionReport(report) => info!(
            symbol = %report.symbol,
            side = %report.side,
            status = %report.order_status,
            price = %report.price,
            quantity = %report.quantity,
            "Order update"
        ),
        StreamEvent::ListenKeyExpired(_) => warn!("Listen key expired"),
        StreamEvent::ControlError { id, code, message } => {
            warn!(id = ?id, code, message = %message, "Subscription request rejected");
        }
        StreamEvent::Undecodable { reason, .. } => warn!(reason = %reason, "Skipped frame"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let symbol = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "BTCUSDT".to_string());

    let config = load_config().context("loading configuration")?;
    info!(testnet = config.testnet, rest = %config.rest_endpoint(), "Starting monitor");

    let rest = Arc::new(build_authenticated_rest_client(&config)?);

    let account = rest
        .get_account()
        .await
        .context("fetching account snapshot")?;
    for balance in account.non_empty_balances() {
        info!(asset = %balance.asset, free = %balance.free, locked = %balance.locked, "Balance");
    }

    let trades = rest
        .get_my_trades(&symbol, &TradeQuery::default().limit(10))
        .await
        .context("fetching recent trades")?;
    for trade in &trades {
        info!(id = trade.id, price = %trade.price, qty = %trade.qty, buyer = trade.is_buyer, "Trade");
    }

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.add(kline_topic(&symbol, KlineInterval::Days1));
    let mut user_data = UserDataStream::open(rest.clone(), registry.clone())
        .await
        .context("opening user data stream")?;

    let mut consumer = build_stream_consumer(&config, registry);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }
            event = consumer.next_event() => match event {
                Ok(event) => {
                    report(&event);
                    if let StreamEvent::ListenKeyExpired(_) = event {
                        if let Err(e) = user_data.renew().await {
                            warn!(error = %e, "Failed to replace expired listen key");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stream ended");
                    break;
                }
            },
        }
    }

    consumer.cancel().await;
    if let Err(e) = user_data.close().await {
        warn!(error = %e, "Failed to close listen key");
    }
    Ok(())
}
