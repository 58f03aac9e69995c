//! SSE streaming (spec §6 `GET /jobs/{id}/stream`).
//!
//! Each connection gets its own [`BroadcastEventBus::subscribe`] receiver;
//! events for other jobs are filtered out rather than routed server-side,
//! since the bus is a single process-wide channel. The stream closes itself
//! right after forwarding a terminal `job_*` event — callers don't need to
//! notice a completed job by timeout.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tokio::sync::broadcast;

use crate::domain::ports::{JobEvent, PublishedEvent};

fn is_terminal(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobCompleted { .. } | JobEvent::JobCancelled { .. })
}

enum StreamState {
    Live(broadcast::Receiver<PublishedEvent>),
    Done,
}

pub fn job_event_stream(
    job_id: String,
    rx: broadcast::Receiver<PublishedEvent>,
    keepalive_s: u64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected = stream::once(async move {
        Ok(Event::default().event("connected").data("{}"))
    });

    let forwarded = stream::unfold(StreamState::Live(rx), move |state| {
        let job_id = job_id.clone();
        async move {
            let mut rx = match state {
                StreamState::Live(rx) => rx,
                StreamState::Done => return None,
            };
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.job_id == job_id => {
                        let terminal = is_terminal(&envelope.event);
                        let payload = serde_json::to_string(&envelope.event).unwrap_or_else(|_| "{}".to_string());
                        let event = Event::default().data(payload);
                        let next_state = if terminal { StreamState::Done } else { StreamState::Live(rx) };
                        return Some((Ok(event), next_state));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    });

    Sse::new(connected.chain(forwarded)).keep_alive(KeepAlive::new().interval(Duration::from_secs(keepalive_s)).text("keep-alive"))
}
