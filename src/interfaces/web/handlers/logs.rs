use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::super::AppState;

pub async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line.trim_end().replace('\r', ""))),
        Err(_) => Ok(Event::default().data("log stream lagged")),
    });

    Sse::new(stream)
}
