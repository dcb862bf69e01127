pub mod core;
pub mod exchanges;

pub use crate::core::{config::ExchangeConfig, errors::ExchangeError, types::*};
pub use crate::exchanges::binance::{BinanceCodec, BinanceRestClient, StreamEvent};
