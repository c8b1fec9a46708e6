use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use super::AppState;
use super::handlers::{jobs, logs, stream};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let casts = ServeDir::new(&state.cast_dir);
    let cors = build_localhost_cors(state.api_port);

    Router::new()
        .route("/api/requests", get(jobs::list_jobs).post(jobs::create_job))
        .route("/api/requests/{id}", get(jobs::get_job))
        .route("/api/requests/{id}/output", get(jobs::get_job_output))
        .route("/api/processing", get(jobs::get_processing))
        .route("/api/logs", get(logs::sse_logs_endpoint))
        .route("/stream", get(stream::live_cast_stream))
        .nest_service("/casts", casts)
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}
