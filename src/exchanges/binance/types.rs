use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// REST Types

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BinanceBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

impl BinanceBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_zero() && self.locked.is_zero()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountInfo {
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub can_withdraw: bool,
    #[serde(default)]
    pub can_deposit: bool,
    #[serde(default)]
    pub update_time: u64,
    #[serde(default)]
    pub account_type: Option<String>,
    pub balances: Vec<BinanceBalance>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl BinanceAccountInfo {
    /// Balances with a non-zero free or locked amount
    pub fn non_empty_balances(&self) -> impl Iterator<Item = &BinanceBalance> {
        self.balances.iter().filter(|b| !b.is_empty())
    }
}

/// One fill returned by `GET /api/v3/myTrades`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceTrade {
    pub symbol: String,
    pub id: u64,
    pub order_id: u64,
    #[serde(default)]
    pub order_list_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: u64,
    pub is_buyer: bool,
    pub is_maker: bool,
    #[serde(default)]
    pub is_best_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceListenKey {
    pub listen_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceServerTime {
    pub server_time: u64,
}

// WebSocket Types

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: BinanceKlineData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceKlineData {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "T")]
    pub close_time: u64,
    #[serde(rename = "i", default)]
    pub interval: String,
    #[serde(rename = "o", with = "rust_decimal::serde::str")]
    pub open_price: Decimal,
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    pub close_price: Decimal,
    #[serde(rename = "h", with = "rust_decimal::serde::str")]
    pub high_price: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub low_price: Decimal,
    #[serde(rename = "v", with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(rename = "n")]
    pub number_of_trades: u64,
    #[serde(rename = "x")]
    pub closed: bool,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
    #[serde(rename = "V", with = "rust_decimal::serde::str")]
    pub taker_buy_base_volume: Decimal,
    #[serde(rename = "Q", with = "rust_decimal::serde::str")]
    pub taker_buy_quote_volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceStreamBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f", with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

/// `outboundAccountPosition`: balances that changed after an account event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceAccountPosition {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "u")]
    pub last_update_time: u64,
    #[serde(rename = "B")]
    pub balances: Vec<BinanceStreamBalance>,
}

/// `balanceUpdate`: deposit, withdrawal or transfer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceBalanceUpdate {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "d", with = "rust_decimal::serde::str")]
    pub delta: Decimal,
    #[serde(rename = "T")]
    pub clear_time: u64,
}

/// `executionReport`: order state change or fill
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceExecutionReport {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "f")]
    pub time_in_force: String,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "r")]
    pub reject_reason: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub last_executed_quantity: Decimal,
    #[serde(rename = "z", with = "rust_decimal::serde::str")]
    pub cumulative_filled_quantity: Decimal,
    #[serde(rename = "L", with = "rust_decimal::serde::str")]
    pub last_executed_price: Decimal,
    #[serde(rename = "n", with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    #[serde(rename = "N")]
    pub commission_asset: Option<String>,
    #[serde(rename = "T")]
    pub transaction_time: u64,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "m")]
    pub is_maker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinanceListenKeyExpired {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "listenKey", default)]
    pub listen_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_account_info_parses_decimal_strings() {
        let account: BinanceAccountInfo = serde_json::from_str(
            r#"{
                "makerCommission": 10,
                "canTrade": true,
                "canWithdraw": true,
                "canDeposit": true,
                "updateTime": 123456789,
                "accountType": "SPOT",
                "balances": [
                    {"asset": "BTC", "free": "4723846.89208129", "locked": "0.00000000"},
                    {"asset": "LTC", "free": "0.00000000", "locked": "0.00000000"}
                ],
                "permissions": ["SPOT"]
            }"#,
        )
        .unwrap();

        assert_eq!(account.balances.len(), 2);
        assert_eq!(
            account.balances[0].free,
            Decimal::from_str("4723846.89208129").unwrap()
        );
        let held: Vec<_> = account.non_empty_balances().map(|b| b.asset.as_str()).collect();
        assert_eq!(held, vec!["BTC"]);
    }

    #[test]
    fn test_trade_parses() {
        let trades: Vec<BinanceTrade> = serde_json::from_str(
            r#"[{
                "symbol": "BNBBTC",
                "id": 28457,
                "orderId": 100234,
                "orderListId": -1,
                "price": "4.00000100",
                "qty": "12.00000000",
                "quoteQty": "48.000012",
                "commission": "10.10000000",
                "commissionAsset": "BNB",
                "time": 1499865549590,
                "isBuyer": true,
                "isMaker": false,
                "isBestMatch": true
            }]"#,
        )
        .unwrap();

        assert_eq!(trades[0].order_id, 100_234);
        assert_eq!(trades[0].order_list_id, -1);
        assert!(trades[0].is_buyer);
    }

    #[test]
    fn test_kline_without_optional_fields() {
        let kline: BinanceKlineData = serde_json::from_str(
            r#"{"t":1,"T":2,"o":"1.5","c":"2","h":"3","l":"1","v":"10","n":4,"x":false,"q":"15","V":"5","Q":"7.5"}"#,
        )
        .unwrap();

        assert_eq!(kline.interval, "");
        assert_eq!(kline.open_price, Decimal::from_str("1.5").unwrap());
        assert!(!kline.closed);
    }
}
