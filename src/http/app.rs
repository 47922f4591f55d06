//! Default application and the middleware every server wraps it in.

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::net::{ActivityKind, ActivityTracker};
use crate::observability::metrics;

/// Application served when the embedding program does not provide one.
pub fn default_application() -> Router {
    Router::new()
        .route("/web/health", get(health))
        .route("/", get(index))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "pass" }))
}

async fn index() -> &'static str {
    "prefork-server\n"
}

/// Request IDs and request tracing.
pub fn with_request_layers(app: Router) -> Router {
    app.layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Record every request in `tracker` while it is being handled.
pub fn with_activity_tracking(app: Router, tracker: ActivityTracker) -> Router {
    app.layer(middleware::from_fn_with_state(tracker, track_request))
}

async fn track_request(
    State(tracker): State<ActivityTracker>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = tracker.track(ActivityKind::Http);
    let response = next.run(request).await;
    metrics::record_request(response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = with_request_layers(default_application());
        let response = app
            .oneshot(Request::builder().uri("/web/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "pass");
    }

    #[tokio::test]
    async fn test_tracking_releases_guard() {
        let tracker = ActivityTracker::new();
        let app = with_activity_tracking(default_application(), tracker.clone());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tracker.active_count(), 0);
    }
}
