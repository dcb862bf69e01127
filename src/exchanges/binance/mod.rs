pub mod builder;
pub mod codec;
pub mod rest;
pub mod types;
pub mod user_data;

// Re-export main types for easier importing
pub use builder::{
    build_authenticated_rest_client, build_rest_client, build_stream_consumer,
    build_stream_session, EXCHANGE_NAME,
};
pub use codec::{BinanceCodec, StreamEvent};
pub use rest::{BinanceRestClient, TradeQuery};
pub use types::{
    BinanceAccountInfo, BinanceAccountPosition, BinanceBalance, BinanceBalanceUpdate,
    BinanceExecutionReport, BinanceKlineData, BinanceKlineEvent, BinanceListenKeyExpired,
    BinanceStreamBalance, BinanceTrade,
};
pub use user_data::UserDataStream;
