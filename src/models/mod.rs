use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

pub const MIN_QUESTION_LEN: usize = 3;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 6;

lazy_static! {
    static ref FINGERPRINT_RE: Regex = Regex::new(r"^[A-Za-z0-9-]{8,128}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub poll_id: String,
    pub text: String,
    pub position: i64,
    pub votes: i64,
}

/// Client-chosen dedup handle. Not an identity, just a token the client keeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accepts tokens coming from outside the process (HTTP bodies, local storage).
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if FINGERPRINT_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidFingerprint)
        }
    }

    /// Random token followed by the creation time in hex milliseconds.
    pub fn generate() -> Self {
        Self(format!(
            "{}-{:x}",
            Uuid::new_v4().simple(),
            Utc::now().timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(poll_id: &str, option_id: &str, fingerprint: Fingerprint) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            fingerprint,
            created_at: Utc::now(),
        }
    }
}

/// A validated poll and its option batch, ready to be written in one go.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub poll: Poll,
    pub options: Vec<PollOption>,
}

impl NewPoll {
    /// Trims everything, drops blank options, then enforces the creation rules.
    /// Nothing here touches a store.
    pub fn new(question: &str, options: &[String]) -> Result<Self, ValidationError> {
        let question = question.trim();
        if question.chars().count() < MIN_QUESTION_LEN {
            return Err(ValidationError::QuestionTooShort {
                min: MIN_QUESTION_LEN,
            });
        }

        let cleaned: Vec<&str> = options
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .collect();

        if cleaned.len() < MIN_OPTIONS {
            return Err(ValidationError::TooFewOptions { min: MIN_OPTIONS });
        }
        if cleaned.len() > MAX_OPTIONS {
            return Err(ValidationError::TooManyOptions { max: MAX_OPTIONS });
        }

        let mut seen = HashSet::new();
        for text in &cleaned {
            if !seen.insert(*text) {
                return Err(ValidationError::DuplicateOption(text.to_string()));
            }
        }

        let poll_id = Uuid::new_v4().to_string();
        let options = cleaned
            .into_iter()
            .enumerate()
            .map(|(position, text)| PollOption {
                id: Uuid::new_v4().to_string(),
                poll_id: poll_id.clone(),
                text: text.to_string(),
                position: position as i64,
                votes: 0,
            })
            .collect();

        Ok(Self {
            poll: Poll {
                id: poll_id,
                question: question.to_string(),
                created_at: Utc::now(),
            },
            options,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiCounter {
    PollsCreated,
    VotesCast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyKpi {
    pub day: NaiveDate,
    pub polls_created: i64,
    pub votes_cast: i64,
}

impl DailyKpi {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            polls_created: 0,
            votes_cast: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn builds_poll_with_ordered_zeroed_options() {
        let new_poll = NewPoll::new("  Pizza or Sushi?  ", &opts(&["Pizza", " Sushi "])).unwrap();
        assert_eq!(new_poll.poll.question, "Pizza or Sushi?");
        assert_eq!(new_poll.options.len(), 2);
        assert_eq!(new_poll.options[0].text, "Pizza");
        assert_eq!(new_poll.options[1].text, "Sushi");
        assert_eq!(new_poll.options[1].position, 1);
        assert!(new_poll.options.iter().all(|o| o.votes == 0));
        assert!(new_poll.options.iter().all(|o| o.poll_id == new_poll.poll.id));
    }

    #[test]
    fn rejects_single_option() {
        let err = NewPoll::new("Lunch?", &opts(&["Pizza"])).unwrap_err();
        assert_eq!(err, ValidationError::TooFewOptions { min: 2 });
    }

    #[test]
    fn blank_options_do_not_count() {
        let err = NewPoll::new("Lunch?", &opts(&["Pizza", "   ", ""])).unwrap_err();
        assert_eq!(err, ValidationError::TooFewOptions { min: 2 });
    }

    #[test]
    fn rejects_identical_options() {
        let err = NewPoll::new("Lunch?", &opts(&["Pizza", "Pizza "])).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateOption("Pizza".into()));
    }

    #[test]
    fn rejects_short_question() {
        let err = NewPoll::new("  ab ", &opts(&["a", "b"])).unwrap_err();
        assert_eq!(err, ValidationError::QuestionTooShort { min: 3 });
    }

    #[test]
    fn rejects_more_than_six_options() {
        let err = NewPoll::new("Pick one", &opts(&["1", "2", "3", "4", "5", "6", "7"])).unwrap_err();
        assert_eq!(err, ValidationError::TooManyOptions { max: 6 });
        assert!(NewPoll::new("Pick one", &opts(&["1", "2", "3", "4", "5", "6"])).is_ok());
    }

    #[test]
    fn generated_fingerprints_parse_and_differ() {
        let a = Fingerprint::generate();
        let b = Fingerprint::generate();
        assert_ne!(a, b);
        assert_eq!(Fingerprint::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn fingerprint_rejects_junk() {
        assert!(Fingerprint::parse("short").is_err());
        assert!(Fingerprint::parse("has spaces in it").is_err());
        assert!(Fingerprint::parse(&"x".repeat(129)).is_err());
        assert!(Fingerprint::parse("abcdef12-18b0c1d2e3f").is_ok());
    }
}
