use crate::core::types::Topic;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Subscription change the registry asks the live connection to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Subscribe(Vec<Topic>),
    Unsubscribe(Vec<Topic>),
}

/// Identifies one attached connection so it can only detach itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LiveLink(u64);

#[derive(Debug, Default)]
struct RegistryState {
    topics: BTreeSet<Topic>,
    live: BTreeMap<LiveLink, mpsc::UnboundedSender<ControlRequest>>,
    next_link: u64,
}

/// The set of topics the caller wants streamed.
///
/// Shared between the caller and any number of stream sessions. Mutations and
/// the live control requests they trigger happen under one lock, so for every
/// attached connection a topic is either part of the snapshot replayed on open
/// or sent live afterwards, never both and never neither.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        let registry = Self::new();
        for topic in topics {
            registry.add(topic);
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a topic; returns false if it was already present.
    ///
    /// When a connection is live a SUBSCRIBE for just this topic is queued.
    pub fn add(&self, topic: impl Into<Topic>) -> bool {
        let topic = topic.into();
        let mut state = self.lock();
        if !state.topics.insert(topic.clone()) {
            return false;
        }

        debug!(topic = %topic, "Topic added");
        Self::send_live(&mut state, ControlRequest::Subscribe(vec![topic]));
        true
    }

    /// Remove a topic; returns false if it was not present.
    ///
    /// When a connection is live an UNSUBSCRIBE for just this topic is queued.
    pub fn remove(&self, topic: &str) -> bool {
        let mut state = self.lock();
        if !state.topics.remove(topic) {
            return false;
        }

        debug!(topic = %topic, "Topic removed");
        Self::send_live(&mut state, ControlRequest::Unsubscribe(vec![topic.to_string()]));
        true
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.lock().topics.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.lock().topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().topics.is_empty()
    }

    /// Point-in-time copy of the current topics
    pub fn snapshot(&self) -> Vec<Topic> {
        self.lock().topics.iter().cloned().collect()
    }

    /// Bind a freshly opened connection and queue the full replay batch.
    ///
    /// Returns the link to pass to [`SubscriptionRegistry::detach`] and the
    /// snapshot that was queued. An empty set queues nothing.
    pub(crate) fn attach(
        &self,
        live: mpsc::UnboundedSender<ControlRequest>,
    ) -> (LiveLink, Vec<Topic>) {
        let mut state = self.lock();
        let link = LiveLink(state.next_link);
        state.next_link += 1;

        let snapshot: Vec<Topic> = state.topics.iter().cloned().collect();
        if !snapshot.is_empty()
            && live
                .send(ControlRequest::Subscribe(snapshot.clone()))
                .is_err()
        {
            warn!("Connection went away before replay");
            return (link, snapshot);
        }
        state.live.insert(link, live);
        (link, snapshot)
    }

    /// Forget one live connection; the others keep receiving changes
    pub(crate) fn detach(&self, link: LiveLink) {
        self.lock().live.remove(&link);
    }

    /// Number of connections currently receiving live changes
    pub fn live_connections(&self) -> usize {
        self.lock().live.len()
    }

    fn send_live(state: &mut RegistryState, request: ControlRequest) {
        state.live.retain(|_, live| {
            let sent = live.send(request.clone()).is_ok();
            if !sent {
                warn!("Live connection went away; change will be replayed on reconnect");
            }
            sent
        });
    }
}
