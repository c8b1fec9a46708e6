use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::super::AppState;
use crate::core::cast;

/// Live feed of the continuous recording. Each viewer gets its own tailer
/// and file handle; the tailer stops when the viewer disconnects.
pub async fn live_cast_stream(State(state): State<AppState>) -> Response {
    let path = state.live_cast_path.clone();
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no live recording" })),
        )
            .into_response();
    }

    let viewer = uuid::Uuid::new_v4();
    debug!(%viewer, "Viewer attached to {}", path.display());

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);
    let poll = state.tail_interval;
    tokio::spawn(async move {
        match cast::tail_cast(path, tx, poll).await {
            Ok(()) => debug!(%viewer, "Viewer detached"),
            Err(e) => warn!(%viewer, "Live feed ended: {}", e),
        }
    });

    // SSE frames cannot carry a bare carriage return.
    let stream = tokio_stream::wrappers::ReceiverStream::new(rx)
        .map(|msg| Ok::<_, Infallible>(Event::default().data(msg.replace('\r', ""))));

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
