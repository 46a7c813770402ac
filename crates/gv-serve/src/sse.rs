use crate::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use gv_events::HubMessage;
use std::convert::Infallible;
use tracing::{debug, warn};

/// Live hub messages as server-sent events, one JSON `{id, type, payload, at}` per event.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.grove().hub().subscribe();
    debug!(subscriber = subscription.id(), "sse observer attached");
    let events = subscription
        .into_stream()
        .map(|message| Ok::<Event, Infallible>(to_event(&message)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(message: &HubMessage) -> Event {
    match serde_json::to_string(message) {
        Ok(json) => Event::default().id(message.id.as_str()).data(json),
        Err(err) => {
            warn!(kind = %message.kind, error = %err, "failed to encode hub message");
            Event::default().comment("encode failed")
        }
    }
}
