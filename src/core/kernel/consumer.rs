use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::registry::SubscriptionRegistry;
use crate::core::kernel::ws::{StreamSession, StreamState};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Pull-based view over one [`StreamSession`].
///
/// Nothing connects until the first event is requested, either through
/// [`StreamConsumer::next_event`] or by polling it as a [`Stream`]. Events
/// are buffered up to `WsConfig::message_buffer_size`; when the buffer is
/// full the session stops reading until the caller catches up.
///
/// The sequence only ends after [`StreamConsumer::cancel`] (or an external
/// `stop` on the session) once the session has reached `Disconnected`.
pub struct StreamConsumer<C: WsCodec> {
    session: StreamSession<C>,
    events: mpsc::Receiver<C::Message>,
    sender: Option<mpsc::Sender<C::Message>>,
    cancelled: bool,
}

impl<C: WsCodec> StreamConsumer<C> {
    pub fn new(session: StreamSession<C>) -> Self {
        let (sender, events) = mpsc::channel(session.config().message_buffer_size.max(1));
        Self {
            session,
            events,
            sender: Some(sender),
            cancelled: false,
        }
    }

    /// Topics streamed by this consumer; changes apply live
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        self.session.registry()
    }

    pub fn state(&self) -> StreamState {
        self.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.session.watch_state()
    }

    pub fn is_started(&self) -> bool {
        self.sender.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Connect the underlying session if that has not happened yet
    pub fn start(&mut self) -> Result<(), ExchangeError> {
        if self.cancelled {
            return Err(ExchangeError::Cancelled);
        }
        if let Some(sender) = self.sender.take() {
            self.session.connect(sender)?;
        }
        Ok(())
    }

    /// Wait for the next decoded event.
    ///
    /// Returns `Cancelled` once the consumer was cancelled or the session
    /// was stopped and every buffered event has been handed out.
    pub async fn next_event(&mut self) -> Result<C::Message, ExchangeError> {
        self.start()?;
        self.events.recv().await.ok_or(ExchangeError::Cancelled)
    }

    /// Stop the session gracefully and end the sequence.
    ///
    /// Waits for the session to reach `Disconnected`; if the peer does not
    /// acknowledge the close in time the session is torn down forcibly.
    /// Events still buffered are no longer handed out; both `next_event`
    /// and the `Stream` end immediately afterwards.
    pub async fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.sender = None;

        info!(url = %self.session.url(), "Cancelling stream consumer");
        self.session.shutdown().await;
        self.events.close();

        if self.session.state() != StreamState::Disconnected {
            warn!(state = %self.session.state(), "Stream session not disconnected after cancel");
        }
    }
}

impl<C: WsCodec> Stream for StreamConsumer<C> {
    type Item = C::Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        if let Err(e) = this.start() {
            warn!(error = %e, "Stream consumer could not start");
            return Poll::Ready(None);
        }
        this.events.poll_recv(cx)
    }
}
