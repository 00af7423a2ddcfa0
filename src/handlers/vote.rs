use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::PollError;
use crate::models::Fingerprint;
use crate::voting::{PollService, PollView, ViewOrder, VoteOutcome};

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option_id: String,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub outcome: VoteOutcome,
    pub view: PollView,
}

pub async fn cast_vote(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, PollError> {
    let fingerprint = Fingerprint::parse(&request.fingerprint)?;
    let outcome = service
        .cast_vote(&poll_id, &request.option_id, &fingerprint)
        .await?;

    // duplicate or not, the client gets the current tally back
    let view = service.load_view(&poll_id, ViewOrder::Created).await?;
    Ok(Json(VoteResponse { outcome, view }))
}

/// Server-sent events: the current results once, then a fresh view after
/// every change. The subscription ends when the client goes away.
pub async fn events(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, PollError> {
    let (initial, live) = service.live_view(&poll_id, ViewOrder::ByVotes).await?;
    info!("Viewer subscribed to poll {}", poll_id);

    let first = stream::once(async move { view_event(&initial) });
    let updates = stream::unfold(live, |mut live| async move {
        let event = match live.next().await? {
            Ok(view) => view_event(&view),
            Err(e) => {
                warn!("Reload for poll {} failed: {}", live.poll_id(), e);
                Ok(Event::default().event("error").data(e.to_string()))
            }
        };
        Some((event, live))
    });

    Ok(Sse::new(first.chain(updates)).keep_alive(KeepAlive::default()))
}

fn view_event(view: &PollView) -> Result<Event, axum::Error> {
    Event::default().event("view").json_data(view)
}
