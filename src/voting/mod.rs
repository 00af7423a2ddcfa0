pub mod tally;

pub use tally::{OptionView, PollView, ViewOrder};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::db::PollStore;
use crate::error::{PollError, StoreError};
use crate::feed::{ChangeFeed, Subscription};
use crate::models::{DailyKpi, Fingerprint, KpiCounter, NewPoll, Vote};

/// Result of a vote that reached the ledger. A duplicate is not an error:
/// the client simply converges to "voted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPoll {
    pub id: String,
    pub vote_url: String,
    pub results_url: String,
}

/// An option whose counter disagrees with its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyDrift {
    pub option_id: String,
    pub counter: i64,
    pub ledger: i64,
}

pub struct PollService {
    store: Arc<dyn PollStore>,
    feed: ChangeFeed,
    base_url: String,
    atomic_votes: bool,
}

impl PollService {
    pub fn new(
        store: Arc<dyn PollStore>,
        feed: ChangeFeed,
        base_url: impl Into<String>,
        atomic_votes: bool,
    ) -> Self {
        Self {
            store,
            feed,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            atomic_votes,
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn vote_url(&self, poll_id: &str) -> String {
        format!("{}/p/{}", self.base_url, poll_id)
    }

    pub fn results_url(&self, poll_id: &str) -> String {
        format!("{}/r/{}", self.base_url, poll_id)
    }

    /// Validation happens before the store is touched.
    pub async fn create_poll(
        &self,
        question: &str,
        options: &[String],
    ) -> Result<CreatedPoll, PollError> {
        let new_poll = NewPoll::new(question, options)?;
        let poll_id = new_poll.poll.id.clone();

        self.store.create_poll(&new_poll).await.map_err(|e| {
            error!("Failed to store poll: {}", e);
            PollError::from(e)
        })?;
        info!(
            "Created poll {} with {} options",
            poll_id,
            new_poll.options.len()
        );

        self.feed.publish(&poll_id);
        self.bump_daily(KpiCounter::PollsCreated).await;

        Ok(CreatedPoll {
            vote_url: self.vote_url(&poll_id),
            results_url: self.results_url(&poll_id),
            id: poll_id,
        })
    }

    /// Ledger insert, then the tally increment only if the ledger accepted.
    ///
    /// Nothing is retried here. A non-duplicate failure is returned as is and
    /// the caller may try again.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<VoteOutcome, PollError> {
        let vote = Vote::new(poll_id, option_id, fingerprint.clone());

        let recorded = if self.atomic_votes && self.store.records_atomically() {
            self.store.record_vote(&vote).await
        } else {
            self.insert_then_increment(&vote).await
        };

        match recorded {
            Ok(()) => {
                info!("Accepted vote for option {} in poll {}", option_id, poll_id);
                self.feed.publish(poll_id);
                self.bump_daily(KpiCounter::VotesCast).await;
                Ok(VoteOutcome::Accepted)
            }
            Err(StoreError::Conflict) => {
                warn!("Duplicate vote in poll {} from {}", poll_id, fingerprint);
                Ok(VoteOutcome::Duplicate)
            }
            Err(e) => {
                error!("Vote in poll {} failed: {}", poll_id, e);
                Err(e.into())
            }
        }
    }

    async fn insert_then_increment(&self, vote: &Vote) -> Result<(), StoreError> {
        // Conflict and every other insert failure stop here, before the tally
        self.store.insert_vote(vote).await?;

        if let Err(e) = self.store.increment_option_vote(&vote.option_id).await {
            error!(
                "Vote {} is in the ledger but option {} was not incremented: {}",
                vote.id, vote.option_id, e
            );
            return Err(e);
        }
        Ok(())
    }

    pub async fn load_view(&self, poll_id: &str, order: ViewOrder) -> Result<PollView, PollError> {
        let poll = self.store.get_poll(poll_id).await?;
        let options = self.store.get_options(poll_id).await?;
        Ok(tally::build_view(&poll, &options, order))
    }

    pub fn subscribe(&self, poll_id: &str) -> Subscription {
        self.feed.subscribe(poll_id)
    }

    /// Subscribes before the first load so no change between the two is lost.
    pub async fn live_view(
        self: &Arc<Self>,
        poll_id: &str,
        order: ViewOrder,
    ) -> Result<(PollView, LiveView), PollError> {
        let subscription = self.subscribe(poll_id);
        let initial = self.load_view(poll_id, order).await?;
        Ok((
            initial,
            LiveView {
                service: Arc::clone(self),
                subscription,
                order,
            },
        ))
    }

    pub async fn daily_stats(&self) -> Result<DailyKpi, PollError> {
        Ok(self.store.get_daily(Utc::now().date_naive()).await?)
    }

    /// Compares every counter against the ledger. A non-empty result means a
    /// vote was recorded without its increment landing.
    pub async fn audit(&self, poll_id: &str) -> Result<Vec<TallyDrift>, PollError> {
        self.store.get_poll(poll_id).await?;

        let mut drift = Vec::new();
        for option in self.store.get_options(poll_id).await? {
            let ledger = self.store.count_votes(&option.id).await?;
            if ledger != option.votes {
                drift.push(TallyDrift {
                    option_id: option.id,
                    counter: option.votes,
                    ledger,
                });
            }
        }

        if !drift.is_empty() {
            warn!("Poll {} has {} drifting option(s)", poll_id, drift.len());
        }
        Ok(drift)
    }

    // Analytics never fail the request that triggered them
    async fn bump_daily(&self, counter: KpiCounter) {
        if let Err(e) = self.store.bump_daily(Utc::now().date_naive(), counter).await {
            warn!("Failed to update daily counter {:?}: {}", counter, e);
        }
    }
}

/// A poll view that follows the change feed. Dropping it cancels the
/// underlying subscription.
pub struct LiveView {
    service: Arc<PollService>,
    subscription: Subscription,
    order: ViewOrder,
}

impl LiveView {
    pub fn poll_id(&self) -> &str {
        self.subscription.poll_id()
    }

    /// Waits for a change and returns the fully reloaded view. `None` once
    /// the feed has shut down.
    pub async fn next(&mut self) -> Option<Result<PollView, PollError>> {
        self.subscription.changed().await?;
        let poll_id = self.subscription.poll_id().to_string();
        Some(self.service.load_view(&poll_id, self.order).await)
    }
}
