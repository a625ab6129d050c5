//! Live events for logged in users.

use std::{convert::Infallible, time::Duration};

use crate::{sse::event_stream, ServerState};

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use time::{macros::format_description, OffsetDateTime};
use tokio_stream::Stream;
use tracing::error;

/// Stream the server's time once a second.
#[axum::debug_handler(state = ServerState)]
pub async fn time_handler(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.shutdown.clone(), |events| async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            // the first tick completes immediately
            interval.tick().await;

            let Some(now) = current_time() else {
                return;
            };
            if !events.send(now).await {
                return;
            }
        }
    })
}

fn current_time() -> Option<String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    OffsetDateTime::now_utc()
        .format(format)
        .map_err(|e| error!("failed to format time: {}", e))
        .ok()
}
