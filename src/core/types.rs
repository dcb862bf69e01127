use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one subscribable stream, compared by exact string equality.
///
/// Either a market stream such as `btcusdt@kline_1d` or an opaque user-data
/// listen key.
pub type Topic = String;

/// Candlestick intervals supported by the spot stream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    Seconds1,

    Minutes1,
    Minutes3,
    Minutes5,
    Minutes15,
    Minutes30,

    Hours1,
    Hours2,
    Hours4,
    Hours6,
    Hours8,
    Hours12,

    Days1,
    Days3,

    Weeks1,

    Months1,
}

impl KlineInterval {
    /// Convert to Binance format (e.g., "1m", "1h", "1d")
    pub fn to_binance_format(&self) -> &'static str {
        match self {
            Self::Seconds1 => "1s",
            Self::Minutes1 => "1m",
            Self::Minutes3 => "3m",
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hours1 => "1h",
            Self::Hours2 => "2h",
            Self::Hours4 => "4h",
            Self::Hours6 => "6h",
            Self::Hours8 => "8h",
            Self::Hours12 => "12h",
            Self::Days1 => "1d",
            Self::Days3 => "3d",
            Self::Weeks1 => "1w",
            Self::Months1 => "1M",
        }
    }

    /// Parse the Binance wire format back into an interval
    pub fn from_binance_format(value: &str) -> Option<Self> {
        let interval = match value {
            "1s" => Self::Seconds1,
            "1m" => Self::Minutes1,
            "3m" => Self::Minutes3,
            "5m" => Self::Minutes5,
            "15m" => Self::Minutes15,
            "30m" => Self::Minutes30,
            "1h" => Self::Hours1,
            "2h" => Self::Hours2,
            "4h" => Self::Hours4,
            "6h" => Self::Hours6,
            "8h" => Self::Hours8,
            "12h" => Self::Hours12,
            "1d" => Self::Days1,
            "3d" => Self::Days3,
            "1w" => Self::Weeks1,
            "1M" => Self::Months1,
            _ => return None,
        };
        Some(interval)
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_binance_format())
    }
}

/// Candlestick topic name: `<symbol-lowercased>@kline_<interval>`
pub fn kline_topic(symbol: &str, interval: KlineInterval) -> Topic {
    format!(
        "{}@kline_{}",
        symbol.to_lowercase(),
        interval.to_binance_format()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kline_topic_lowercases_symbol() {
        assert_eq!(
            kline_topic("BTCUSDT", KlineInterval::Days1),
            "btcusdt@kline_1d"
        );
        assert_eq!(
            kline_topic("ethBTC", KlineInterval::Minutes15),
            "ethbtc@kline_15m"
        );
    }

    #[test]
    fn test_month_and_minute_are_distinct() {
        assert_eq!(KlineInterval::Months1.to_binance_format(), "1M");
        assert_eq!(KlineInterval::Minutes1.to_binance_format(), "1m");
        assert_eq!(
            KlineInterval::from_binance_format("1M"),
            Some(KlineInterval::Months1)
        );
        assert_eq!(KlineInterval::from_binance_format("7m"), None);
    }
}
