use crate::core::errors::ExchangeError;
use crate::core::kernel::WsCodec;
use crate::core::types::Topic;
use crate::exchanges::binance::types::{
    BinanceAccountPosition, BinanceBalanceUpdate, BinanceExecutionReport, BinanceKlineEvent,
    BinanceListenKeyExpired,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Decoded frame from the Binance stream endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Kline(BinanceKlineEvent),
    AccountPosition(BinanceAccountPosition),
    BalanceUpdate(BinanceBalanceUpdate),
    ExecutionReport(Box<BinanceExecutionReport>),
    ListenKeyExpired(BinanceListenKeyExpired),
    /// The server rejected a SUBSCRIBE/UNSUBSCRIBE request
    ControlError {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    /// A frame that could not be decoded; the session keeps running
    Undecodable { raw: String, reason: String },
}

impl StreamEvent {
    pub fn is_undecodable(&self) -> bool {
        matches!(self, Self::Undecodable { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceCodec;

impl WsCodec for BinanceCodec {
    type Message = StreamEvent;

    fn encode_subscription(&self, topics: &[Topic], id: u64) -> Result<Message, ExchangeError> {
        let subscription = json!({
            "method": "SUBSCRIBE",
            "params": topics,
            "id": id
        });
        Ok(Message::Text(subscription.to_string()))
    }

    fn encode_unsubscription(&self, topics: &[Topic], id: u64) -> Result<Message, ExchangeError> {
        let unsubscription = json!({
            "method": "UNSUBSCRIBE",
            "params": topics,
            "id": id
        });
        Ok(Message::Text(unsubscription.to_string()))
    }

    fn decode_message(&self, message: Message) -> Option<Self::Message> {
        match message {
            Message::Text(text) => self.decode_text(&text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => self.decode_text(&text),
                Err(e) => Some(undecodable(
                    String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    format!("Invalid UTF-8 in binary message: {}", e),
                )),
            },
            _ => None,
        }
    }
}

impl BinanceCodec {
    /// Decode one text frame; `None` for subscription acknowledgements
    pub fn decode_text(&self, text: &str) -> Option<StreamEvent> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Some(undecodable(text.to_string(), format!("Invalid JSON: {}", e))),
        };

        // Combined stream format wraps the payload
        let payload = match (value.get("stream"), value.get("data")) {
            (Some(Value::String(_)), Some(data)) => data,
            _ => &value,
        };

        if payload.get("k").is_some_and(Value::is_object) {
            return Some(parse(text, payload, StreamEvent::Kline));
        }

        if let Some(event_type) = payload.get("e").and_then(Value::as_str) {
            return Some(decode_user_event(text, event_type, payload));
        }

        if let Some(error) = payload.get("error") {
            return Some(StreamEvent::ControlError {
                id: payload.get("id").and_then(Value::as_u64),
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        if payload.get("result").is_some() && payload.get("id").is_some() {
            debug!(id = ?payload.get("id"), "Control request acknowledged");
            return None;
        }

        Some(undecodable(
            text.to_string(),
            "Unrecognized frame shape".to_string(),
        ))
    }
}

fn decode_user_event(raw: &str, event_type: &str, payload: &Value) -> StreamEvent {
    match event_type {
        "outboundAccountPosition" => parse(raw, payload, StreamEvent::AccountPosition),
        "balanceUpdate" => parse(raw, payload, StreamEvent::BalanceUpdate),
        "executionReport" => parse(raw, payload, |report| {
            StreamEvent::ExecutionReport(Box::new(report))
        }),
        "listenKeyExpired" => parse(raw, payload, StreamEvent::ListenKeyExpired),
        other => undecodable(raw.to_string(), format!("Unknown event type: {}", other)),
    }
}

fn parse<T, F>(raw: &str, payload: &Value, wrap: F) -> StreamEvent
where
    T: DeserializeOwned,
    F: FnOnce(T) -> StreamEvent,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(decoded) => wrap(decoded),
        Err(e) => undecodable(raw.to_string(), e.to_string()),
    }
}

fn undecodable(raw: String, reason: String) -> StreamEvent {
    warn!(reason = %reason, "Undecodable stream frame");
    StreamEvent::Undecodable { raw, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const KLINE: &str = r#"{"e":"kline","E":1700000000000,"s":"BTCUSDT","k":{"t":1699920000000,"T":1700006399999,"s":"BTCUSDT","i":"1d","o":"100","c":"105","h":"110","l":"95","v":"12.5","n":42,"x":true,"q":"1300","V":"6","Q":"630"}}"#;

    fn decode(text: &str) -> Option<StreamEvent> {
        BinanceCodec.decode_message(Message::Text(text.to_string()))
    }

    #[test]
    fn test_encode_subscription() {
        let message = BinanceCodec
            .encode_subscription(&["btcusdt@kline_1d".to_string(), "abc".to_string()], 7)
            .unwrap();
        let value: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"method": "SUBSCRIBE", "params": ["btcusdt@kline_1d", "abc"], "id": 7})
        );
    }

    #[test]
    fn test_encode_unsubscription() {
        let message = BinanceCodec
            .encode_unsubscription(&["abc".to_string()], 2)
            .unwrap();
        let value: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(value["method"], "UNSUBSCRIBE");
        assert_eq!(value["id"], 2);
    }

    #[test]
    fn test_decode_kline() {
        let Some(StreamEvent::Kline(event)) = decode(KLINE) else {
            panic!("expected kline");
        };
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.kline.interval, "1d");
        assert_eq!(event.kline.open_price, Decimal::from(100));
        assert_eq!(event.kline.close_price, Decimal::from(105));
        assert!(event.kline.closed);
    }

    #[test]
    fn test_decode_combined_stream_envelope() {
        let wrapped = format!(r#"{{"stream":"btcusdt@kline_1d","data":{}}}"#, KLINE);
        assert!(matches!(decode(&wrapped), Some(StreamEvent::Kline(_))));
    }

    #[test]
    fn test_decode_balance_update() {
        let event = decode(
            r#"{"e":"balanceUpdate","E":1573200697110,"a":"BTC","d":"100.00000000","T":1573200697068}"#,
        );
        let Some(StreamEvent::BalanceUpdate(update)) = &event else {
            panic!("expected balance update, got {:?}", event);
        };
        assert_eq!(update.asset, "BTC");
        assert_eq!(update.delta, Decimal::from(100));
    }

    #[test]
    fn test_decode_account_position() {
        let event = decode(
            r#"{"e":"outboundAccountPosition","E":1564034571105,"u":1564034571073,"B":[{"a":"ETH","f":"10000.000000","l":"0.000000"}]}"#,
        );
        let Some(StreamEvent::AccountPosition(position)) = &event else {
            panic!("expected account position, got {:?}", event);
        };
        assert_eq!(position.balances.len(), 1);
        assert_eq!(position.balances[0].asset, "ETH");
    }

    #[test]
    fn test_decode_execution_report() {
        let event = decode(
            r#"{"e":"executionReport","E":1499405658658,"s":"ETHBTC","c":"mUvoqJxFIILMdfAW5iGSOW","S":"BUY","o":"LIMIT","f":"GTC","q":"1.00000000","p":"0.10264410","P":"0.00000000","F":"0.00000000","g":-1,"C":"","x":"NEW","X":"NEW","r":"NONE","i":4293153,"l":"0.00000000","z":"0.00000000","L":"0.00000000","n":"0","N":null,"T":1499405658657,"t":-1,"I":8641984,"w":true,"m":false,"M":false,"O":1499405658657,"Z":"0.00000000","Y":"0.00000000","Q":"0.00000000"}"#,
        );
        let Some(StreamEvent::ExecutionReport(report)) = &event else {
            panic!("expected execution report, got {:?}", event);
        };
        assert_eq!(report.order_id, 4_293_153);
        assert_eq!(report.execution_type, "NEW");
        assert_eq!(report.commission_asset, None);
    }

    #[test]
    fn test_decode_listen_key_expired() {
        let event = decode(r#"{"e":"listenKeyExpired","E":1576653824250,"listenKey":"abc"}"#);
        let Some(StreamEvent::ListenKeyExpired(expired)) = &event else {
            panic!("expected listen key expiry, got {:?}", event);
        };
        assert_eq!(expired.listen_key.as_deref(), Some("abc"));
    }

    #[test]
    fn test_subscription_ack_is_consumed() {
        assert_eq!(decode(r#"{"result":null,"id":1}"#), None);
    }

    #[test]
    fn test_control_error_is_surfaced() {
        let event = decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":3}"#);
        assert_eq!(
            event,
            Some(StreamEvent::ControlError {
                id: Some(3),
                code: 2,
                message: "Invalid request".to_string(),
            })
        );
    }

    #[test]
    fn test_garbage_is_undecodable_with_raw_payload() {
        let Some(StreamEvent::Undecodable { raw, .. }) = decode("not json") else {
            panic!("expected undecodable");
        };
        assert_eq!(raw, "not json");
    }

    #[test]
    fn test_unknown_event_type_is_undecodable() {
        let event = decode(r#"{"e":"somethingNew","E":1}"#).unwrap();
        assert!(event.is_undecodable());
    }

    #[test]
    fn test_kline_with_bad_field_is_undecodable() {
        let event = decode(r#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":1}}"#).unwrap();
        assert!(event.is_undecodable());
    }

    #[test]
    fn test_binary_frame_is_decoded() {
        let event = BinanceCodec.decode_message(Message::Binary(KLINE.as_bytes().to_vec()));
        assert!(matches!(event, Some(StreamEvent::Kline(_))));
    }
}
