mod poll;
mod vote;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde_json::json;
use std::sync::Arc;

use crate::error::PollError;
use crate::voting::PollService;

pub use poll::CreatePollRequest;
pub use vote::{VoteRequest, VoteResponse};

pub fn router(service: Arc<PollService>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/polls", post(poll::create_poll))
        .route("/api/polls/:id", get(poll::vote_page))
        .route("/api/polls/:id/results", get(poll::results_page))
        .route("/api/polls/:id/audit", get(poll::audit))
        .route("/api/polls/:id/votes", post(vote::cast_vote))
        .route("/api/polls/:id/events", get(vote::events))
        .route("/api/stats/today", get(poll::today))
        .with_state(service)
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = match &self {
            PollError::Validation(_) => StatusCode::BAD_REQUEST,
            PollError::MissingEntity(_) => StatusCode::NOT_FOUND,
            PollError::StoreUnavailable(_) => {
                error!("Request failed: {}", self);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (PollError::Validation(ValidationError::InvalidFingerprint), StatusCode::BAD_REQUEST),
            (PollError::MissingEntity("poll".into()), StatusCode::NOT_FOUND),
            (PollError::StoreUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
