use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::PollStore;
use crate::error::StoreError;
use crate::models::{DailyKpi, KpiCounter, NewPoll, Poll, PollOption, Vote};

#[derive(Default)]
struct MemoryState {
    polls: HashMap<String, Poll>,
    options: HashMap<String, PollOption>,
    // option ids per poll, creation order
    poll_options: HashMap<String, Vec<String>>,
    votes: Vec<Vote>,
    voted: HashSet<(String, String)>,
    daily: HashMap<NaiveDate, DailyKpi>,
}

/// In-process store. Every operation runs under one lock, so the ledger's
/// check-and-insert and the counter increment are each atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn create_poll(&self, new_poll: &NewPoll) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.polls.contains_key(&new_poll.poll.id) {
            return Err(StoreError::Conflict);
        }

        let ids = new_poll.options.iter().map(|o| o.id.clone()).collect();
        for option in &new_poll.options {
            state.options.insert(option.id.clone(), option.clone());
        }
        state.poll_options.insert(new_poll.poll.id.clone(), ids);
        state
            .polls
            .insert(new_poll.poll.id.clone(), new_poll.poll.clone());
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        let state = self.state.lock().await;
        state
            .polls
            .get(poll_id)
            .cloned()
            .ok_or(StoreError::NotFound("poll"))
    }

    async fn get_options(&self, poll_id: &str) -> Result<Vec<PollOption>, StoreError> {
        let state = self.state.lock().await;
        let Some(ids) = state.poll_options.get(poll_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.options.get(id).cloned())
            .collect())
    }

    async fn insert_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.polls.contains_key(&vote.poll_id) {
            return Err(StoreError::NotFound("poll"));
        }
        match state.options.get(&vote.option_id) {
            Some(option) if option.poll_id == vote.poll_id => {}
            _ => return Err(StoreError::NotFound("option")),
        }

        let key = (vote.poll_id.clone(), vote.fingerprint.as_str().to_string());
        if !state.voted.insert(key) {
            return Err(StoreError::Conflict);
        }
        state.votes.push(vote.clone());
        Ok(())
    }

    async fn increment_option_vote(&self, option_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let option = state
            .options
            .get_mut(option_id)
            .ok_or(StoreError::NotFound("option"))?;
        option.votes += 1;
        Ok(())
    }

    async fn count_votes(&self, option_id: &str) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .iter()
            .filter(|vote| vote.option_id == option_id)
            .count() as i64)
    }

    async fn bump_daily(&self, day: NaiveDate, counter: KpiCounter) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let kpi = state
            .daily
            .entry(day)
            .or_insert_with(|| DailyKpi::empty(day));
        match counter {
            KpiCounter::PollsCreated => kpi.polls_created += 1,
            KpiCounter::VotesCast => kpi.votes_cast += 1,
        }
        Ok(())
    }

    async fn get_daily(&self, day: NaiveDate) -> Result<DailyKpi, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .daily
            .get(&day)
            .cloned()
            .unwrap_or_else(|| DailyKpi::empty(day)))
    }
}
