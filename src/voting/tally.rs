use serde::Serialize;

use crate::models::{Poll, PollOption};

/// Votes after which a result is shown as settled on the vote page.
pub const VOTE_GOAL: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOrder {
    /// Creation order, as on the vote page.
    Created,
    /// Most votes first, ties in creation order, as on the results page.
    ByVotes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub id: String,
    pub text: String,
    pub votes: i64,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalProgress {
    pub goal: i64,
    pub missing: i64,
    pub progress_pct: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollView {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<OptionView>,
    pub total_votes: i64,
    pub goal: GoalProgress,
}

/// Share of `total` as a rounded whole percentage; 0 when nothing was cast.
pub fn percent(votes: i64, total: i64) -> u32 {
    if total <= 0 {
        return 0;
    }
    ((votes as f64 / total as f64) * 100.0).round() as u32
}

pub fn goal_progress(total_votes: i64) -> GoalProgress {
    GoalProgress {
        goal: VOTE_GOAL,
        missing: (VOTE_GOAL - total_votes).max(0),
        progress_pct: percent(total_votes, VOTE_GOAL).min(100),
    }
}

/// Rebuilds the whole view from stored state. Never patched incrementally.
pub fn build_view(poll: &Poll, options: &[PollOption], order: ViewOrder) -> PollView {
    let total_votes: i64 = options.iter().map(|o| o.votes).sum();

    let mut views: Vec<OptionView> = options
        .iter()
        .map(|option| OptionView {
            id: option.id.clone(),
            text: option.text.clone(),
            votes: option.votes,
            percent: percent(option.votes, total_votes),
        })
        .collect();

    if order == ViewOrder::ByVotes {
        // stable, so ties keep creation order
        views.sort_by(|a, b| b.votes.cmp(&a.votes));
    }

    PollView {
        poll_id: poll.id.clone(),
        question: poll.question.clone(),
        options: views,
        total_votes,
        goal: goal_progress(total_votes),
    }
}
