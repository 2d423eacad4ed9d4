//! HTTP API assembly.
//!
//! Routes are split per concern (health, metrics, tests) and merged
//! into one router here: the same assembly `main.rs` serves and the
//! integration tests drive with `tower::ServiceExt::oneshot`.

pub mod headers;
pub mod health;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::AppMetrics;
use tests::TestsState;

/// Count and time every request, labelled by method, path and status.
async fn track_metrics(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(start.elapsed().as_secs_f64());
    response
}

pub fn build_router(state: TestsState, metrics: Arc<AppMetrics>) -> Router {
    let request_metrics = metrics.clone();
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move {
                    match metrics.render() {
                        Ok(body) => Response::builder()
                            .status(200)
                            .header("content-type", "text/plain; version=0.0.4")
                            .body(Body::from(body))
                            .expect("metrics response should be valid"),
                        Err(err) => Response::builder()
                            .status(500)
                            .body(Body::from(err.to_string()))
                            .expect("metrics error response should be valid"),
                    }
                }
            }),
        )
        .route("/tests", get(tests::list_tests).post(tests::create_test))
        .route("/tests/:id", get(tests::get_test))
        .route("/tests/:id/winner", get(tests::get_winner))
        .route("/tests/:id/schedule", post(tests::schedule_test))
        .route("/tests/:id/pause", post(tests::pause_test))
        .route("/tests/:id/resume", post(tests::resume_test))
        .route("/tests/:id/cancel", post(tests::cancel_test))
        .route("/tests/:id/rotate", post(tests::rotate_now))
        .layer(middleware::from_fn_with_state(request_metrics, track_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
