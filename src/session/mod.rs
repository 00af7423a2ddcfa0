use log::{info, warn};
use std::sync::Arc;

use crate::error::PollError;
use crate::identity::{voted_key, IdentityTagger, KvStore};
use crate::voting::{LiveView, PollService, PollView, ViewOrder, VoteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    NotVoted,
    Voted,
}

/// One client's relationship with one poll.
///
/// The local "voted" marker only saves a round trip; the ledger still decides.
pub struct PollSession {
    service: Arc<PollService>,
    kv: Arc<dyn KvStore>,
    tagger: IdentityTagger,
    poll_id: String,
}

impl PollSession {
    pub fn new(service: Arc<PollService>, kv: Arc<dyn KvStore>, poll_id: impl Into<String>) -> Self {
        Self {
            service,
            tagger: IdentityTagger::new(Arc::clone(&kv)),
            kv,
            poll_id: poll_id.into(),
        }
    }

    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    pub fn state(&self) -> VoteState {
        match self.kv.get(&voted_key(&self.poll_id)) {
            Some(_) => VoteState::Voted,
            None => VoteState::NotVoted,
        }
    }

    /// Casts this client's vote. When the client already voted, returns
    /// `Duplicate` without contacting the store. Both outcomes leave the
    /// session in `Voted`; an error leaves it untouched so the user can retry.
    pub async fn vote(&self, option_id: &str) -> Result<VoteOutcome, PollError> {
        if self.state() == VoteState::Voted {
            info!("Client already voted in poll {}, skipping", self.poll_id);
            return Ok(VoteOutcome::Duplicate);
        }

        let fingerprint = self.tagger.get_or_create_fingerprint();
        let outcome = self
            .service
            .cast_vote(&self.poll_id, option_id, &fingerprint)
            .await?;
        self.mark_voted();
        Ok(outcome)
    }

    fn mark_voted(&self) {
        if let Err(e) = self.kv.set(&voted_key(&self.poll_id), "1") {
            warn!("Could not remember vote for poll {}: {}", self.poll_id, e);
        }
    }

    pub async fn view(&self) -> Result<PollView, PollError> {
        self.service.load_view(&self.poll_id, ViewOrder::Created).await
    }

    pub async fn watch(&self, order: ViewOrder) -> Result<(PollView, LiveView), PollError> {
        self.service.live_view(&self.poll_id, order).await
    }
}
