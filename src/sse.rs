//! Server-Sent Events streams.

use std::{convert::Infallible, future::Future};

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::debug;

use crate::shutdown;

/// Messages buffered per connection before the producer waits.
const BUFFER: usize = 16;

/// Handed to a stream's producer to emit messages.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<String>,
}

impl EventSender {
    /// Emit one message. Returns `false` once the client has gone away, at
    /// which point the producer should stop.
    pub async fn send(&self, data: impl Into<String>) -> bool {
        self.tx.send(data.into()).await.is_ok()
    }
}

/// Start `producer` on its own task and stream what it sends to the client.
///
/// The producer is dropped when it returns, when the client disconnects and
/// its next send fails, or when the server shuts down.
pub fn event_stream<F, Fut>(
    mut shutdown: shutdown::Receiver,
    producer: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: FnOnce(EventSender) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(BUFFER);
    let produce = producer(EventSender { tx });

    tokio::spawn(async move {
        tokio::select! {
            _ = produce => debug!("event stream finished"),
            _ = shutdown.recv() => debug!("event stream stopped for shutdown"),
        }
    });

    let stream = ReceiverStream::new(rx).map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[tokio::test]
    async fn streams_until_producer_finishes() {
        let sender = shutdown::Sender::new();

        let sse = event_stream(sender.subscribe(), |events| async move {
            for n in 0..3 {
                if !events.send(n.to_string()).await {
                    return;
                }
            }
        });

        let response = sse.into_response();
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"data: 0\n\ndata: 1\n\ndata: 2\n\n");

        sender.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_ends_streams() {
        let sender = shutdown::Sender::new();

        let sse = event_stream(sender.subscribe(), |events| async move {
            events.send("first").await;
            std::future::pending::<()>().await;
        });

        let mut body = sse.into_response().into_body().into_data_stream();
        let first = body.next().await.expect("a frame").expect("data");
        assert_eq!(&first[..], b"data: first\n\n");

        sender.shutdown().await;
        assert!(body.next().await.is_none());
    }
}
