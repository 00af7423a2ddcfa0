use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::PollError;
use crate::models::DailyKpi;
use crate::voting::{CreatedPoll, PollService, PollView, TallyDrift, ViewOrder};

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
}

pub async fn create_poll(
    State(service): State<Arc<PollService>>,
    Json(request): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<CreatedPoll>), PollError> {
    let created = service
        .create_poll(&request.question, &request.options)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn vote_page(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollView>, PollError> {
    Ok(Json(service.load_view(&poll_id, ViewOrder::Created).await?))
}

pub async fn results_page(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollView>, PollError> {
    Ok(Json(service.load_view(&poll_id, ViewOrder::ByVotes).await?))
}

pub async fn audit(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
) -> Result<Json<Vec<TallyDrift>>, PollError> {
    Ok(Json(service.audit(&poll_id).await?))
}

pub async fn today(State(service): State<Arc<PollService>>) -> Result<Json<DailyKpi>, PollError> {
    Ok(Json(service.daily_stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::feed::ChangeFeed;

    fn service() -> Arc<PollService> {
        Arc::new(PollService::new(
            Arc::new(MemoryStore::new()),
            ChangeFeed::default(),
            "http://localhost:8080",
            true,
        ))
    }

    fn request(question: &str, options: &[&str]) -> Json<CreatePollRequest> {
        Json(CreatePollRequest {
            question: question.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn create_then_read_both_pages() {
        let service = service();
        let (status, Json(created)) =
            create_poll(State(Arc::clone(&service)), request("Pizza or Sushi?", &["Pizza", "Sushi"]))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.vote_url.ends_with(&format!("/p/{}", created.id)));

        let Json(view) = vote_page(State(Arc::clone(&service)), Path(created.id.clone()))
            .await
            .unwrap();
        assert_eq!(view.question, "Pizza or Sushi?");

        let Json(results) = results_page(State(Arc::clone(&service)), Path(created.id.clone()))
            .await
            .unwrap();
        assert_eq!(results.options.len(), 2);

        let Json(drift) = audit(State(Arc::clone(&service)), Path(created.id)).await.unwrap();
        assert!(drift.is_empty());

        let Json(stats) = today(State(service)).await.unwrap();
        assert_eq!(stats.polls_created, 1);
    }

    #[tokio::test]
    async fn invalid_poll_is_a_validation_error() {
        let err = create_poll(State(service()), request("Lunch?", &["Pizza"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_poll_is_missing() {
        let err = vote_page(State(service()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::MissingEntity(_)));
    }
}
