use crate::core::errors::ExchangeError;
use crate::core::types::Topic;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for exchange-specific WebSocket message encoding/decoding
///
/// Decoding never fails: a frame the codec cannot understand must come back as
/// an "undecodable" value of `Self::Message` so one bad frame cannot end the
/// session.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing decoded frames from this exchange
    type Message: Send + 'static;

    /// Encode a SUBSCRIBE control frame for `topics`
    fn encode_subscription(&self, topics: &[Topic], id: u64) -> Result<Message, ExchangeError>;

    /// Encode an UNSUBSCRIBE control frame for `topics`
    fn encode_unsubscription(&self, topics: &[Topic], id: u64) -> Result<Message, ExchangeError>;

    /// Decode a text or binary data frame
    ///
    /// Control frames (ping, pong, close) are handled by the session and
    /// never reach the codec.
    ///
    /// # Returns
    /// - `Some(message)` - A decoded event, or an undecodable event carrying the raw payload
    /// - `None` - The frame was a protocol reply the codec consumed (e.g. a subscribe ack)
    fn decode_message(&self, message: Message) -> Option<Self::Message>;
}
