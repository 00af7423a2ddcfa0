//! Per-poll change notifications.
//!
//! A notification only says "this poll's options changed"; subscribers are
//! expected to reload. Bursts are coalesced and a lagging subscriber gets a
//! single notification for everything it missed.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub const DEFAULT_CAPACITY: usize = 64;
pub const MAX_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsChanged {
    pub poll_id: String,
}

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<OptionsChanged>>>>;

#[derive(Clone)]
pub struct ChangeFeed {
    channels: Channels,
    capacity: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.clamp(1, MAX_CAPACITY),
        }
    }

    /// Returns how many subscribers were notified.
    pub fn publish(&self, poll_id: &str) -> usize {
        let channels = lock(&self.channels);
        match channels.get(poll_id) {
            Some(sender) => sender
                .send(OptionsChanged {
                    poll_id: poll_id.to_string(),
                })
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, poll_id: &str) -> Subscription {
        let mut channels = lock(&self.channels);
        let receiver = channels
            .entry(poll_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!("New subscriber for poll {}", poll_id);

        Subscription {
            poll_id: poll_id.to_string(),
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn subscriber_count(&self, poll_id: &str) -> usize {
        lock(&self.channels)
            .get(poll_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Polls with at least one live listener.
    pub fn active_polls(&self) -> usize {
        lock(&self.channels).len()
    }
}

fn lock(channels: &Channels) -> MutexGuard<'_, HashMap<String, broadcast::Sender<OptionsChanged>>> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live listener on one poll. Dropping it cancels the subscription and
/// removes the poll's channel once nobody else listens.
pub struct Subscription {
    poll_id: String,
    receiver: Option<broadcast::Receiver<OptionsChanged>>,
    channels: Channels,
}

impl Subscription {
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    /// Waits for the next change. `None` means the feed is gone.
    pub async fn changed(&mut self) -> Option<OptionsChanged> {
        let receiver = self.receiver.as_mut()?;
        let notification = match receiver.recv().await {
            Ok(notification) => notification,
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "Subscriber for poll {} lagged by {} notifications",
                    self.poll_id, skipped
                );
                OptionsChanged {
                    poll_id: self.poll_id.clone(),
                }
            }
            Err(RecvError::Closed) => return None,
        };

        // anything already queued is covered by the reload this one triggers
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Some(notification)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // release our receiver before checking who is left
        drop(self.receiver.take());
        let mut channels = lock(&self.channels);
        let idle = channels
            .get(&self.poll_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if idle {
            channels.remove(&self.poll_id);
            debug!("Removed idle change channel for poll {}", self.poll_id);
        }
    }
}
