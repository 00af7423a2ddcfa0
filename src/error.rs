use thiserror::Error;

/// Bad input at poll creation or vote submission. Always recoverable by the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The question must be at least {min} characters long")]
    QuestionTooShort { min: usize },

    #[error("At least {min} options are required")]
    TooFewOptions { min: usize },

    #[error("At most {max} options are allowed")]
    TooManyOptions { max: usize },

    #[error("Option \"{0}\" appears more than once")]
    DuplicateOption(String),

    #[error("Invalid fingerprint")]
    InvalidFingerprint,
}

/// Failures reported by a [`crate::db::PollStore`].
///
/// `Conflict` is the typed uniqueness violation the vote ledger branches on;
/// it is never inferred from message text.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Uniqueness constraint violated")]
    Conflict,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
            // votes reference (option_id, poll_id) so a mismatched pair lands here too
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                StoreError::NotFound("option")
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// What callers of [`crate::voting::PollService`] see.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("The {0} was not found")]
    MissingEntity(String),

    #[error("The poll service is unavailable, please try again ({0})")]
    StoreUnavailable(String),
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => PollError::MissingEntity(what.to_string()),
            other => PollError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_becomes_missing_entity() {
        let err: PollError = StoreError::NotFound("poll").into();
        assert!(matches!(err, PollError::MissingEntity(ref what) if what == "poll"));
        assert_eq!(err.to_string(), "The poll was not found");
    }

    #[test]
    fn unavailable_and_corrupt_surface_as_store_unavailable() {
        let err: PollError = StoreError::Unavailable("pool timed out".into()).into();
        assert!(matches!(err, PollError::StoreUnavailable(_)));

        let err: PollError = StoreError::Corrupt("bad timestamp".into()).into();
        assert!(matches!(err, PollError::StoreUnavailable(_)));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
    }
}
