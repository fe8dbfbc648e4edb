use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::signature::verify_signature;
use crate::core::sync::{SyncEngine, WebhookEvent};

const WEBHOOK_BODY_LIMIT: usize = 10 * 1024;
const EVENT_HEADER: &str = "x-github-event";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) webhook_secret: String,
}

pub(crate) fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route(
            "/api/webhook/{source}",
            post(webhook_endpoint).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .route("/sync", get(sync_endpoint))
        .route("/health", get(health_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}

/// External services authenticate via the HMAC signature, not a session,
/// so this route stays public.
async fn webhook_endpoint(
    Path(source): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if source != "github" {
        return (StatusCode::NOT_FOUND, "Unknown webhook source").into_response();
    }

    match verify_signature(&headers, &body, &state.webhook_secret) {
        Ok(true) => {}
        Ok(false) => {
            info!("Rejected webhook with an invalid signature");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
        Err(e) => {
            info!("Rejected webhook: {e}");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            info!("Webhook body was not valid JSON: {e}");
            return (StatusCode::BAD_REQUEST, "Invalid payload").into_response();
        }
    };
    let tag = headers
        .get(EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    info!("Received webhook event '{}'", tag);
    match state
        .engine
        .handle_event(WebhookEvent::from_parts(tag, payload))
        .await
    {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!("Webhook handler failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing webhook",
            )
                .into_response()
        }
    }
}

async fn sync_endpoint(State(state): State<AppState>) -> Response {
    match state.engine.sync_repository().await {
        Ok(_) => (StatusCode::OK, "Sync completed successfully").into_response(),
        Err(e) => {
            error!("Manual sync failed: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error during sync").into_response()
        }
    }
}

async fn health_endpoint() -> &'static str {
    "Server is running"
}

async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
        ),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::github::testing::FakeSourceHost;
    use crate::core::workspace::blocks::block_text;
    use crate::core::workspace::testing::FakeWorkspace;
    use hmac::Mac;
    use tower::util::ServiceExt;

    const SECRET: &str = "test-webhook-secret";

    fn test_state() -> (Arc<FakeWorkspace>, AppState) {
        let workspace = Arc::new(FakeWorkspace::new());
        let engine = Arc::new(SyncEngine::new(
            workspace.clone(),
            Arc::new(FakeSourceHost::new()),
            "forge",
        ));
        (
            workspace,
            AppState {
                engine,
                webhook_secret: SECRET.to_string(),
            },
        )
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn webhook_request(event: &str, body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhook/github")
            .header("content-type", "application/json")
            .header(EVENT_HEADER, event);
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Server is running");
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn webhook_without_signature_is_unauthorized() {
        let (workspace, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(webhook_request("issues", "{}", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, "Invalid signature");
        assert_eq!(
            workspace.calls.load(std::sync::atomic::Ordering::SeqCst),
            0,
            "no engine call happens before verification"
        );
    }

    #[tokio::test]
    async fn webhook_with_wrong_signature_is_unauthorized() {
        let (_, state) = test_state();
        let app = build_router(state);

        let body = r#"{"action":"opened"}"#;
        let wrong = sign(b"something else entirely");
        let response = app
            .oneshot(webhook_request("issues", body, Some(&wrong)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (_, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/webhook/gitlab")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn verified_issue_event_lands_in_the_workspace() {
        let (workspace, state) = test_state();
        let app = build_router(state);

        let body = serde_json::json!({
            "action": "opened",
            "issue": {
                "number": 42,
                "title": "Bug",
                "html_url": "https://github.example/acme/forge/issues/42"
            },
            "repository": { "name": "forge" }
        })
        .to_string();
        let signature = sign(body.as_bytes());

        let response = app
            .oneshot(webhook_request("issues", &body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let appends = workspace.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        assert_eq!(block_text(&appends[0].1[0]), "Issue opened: #42 Bug");
    }

    #[tokio::test]
    async fn verified_unknown_event_is_accepted_as_a_no_op() {
        let (workspace, state) = test_state();
        let app = build_router(state);

        let body = "{}";
        let signature = sign(body.as_bytes());
        let response = app
            .oneshot(webhook_request("watch", body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(workspace.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn manual_sync_route_runs_the_resynchronization() {
        let (workspace, state) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Sync completed successfully");
        assert_eq!(workspace.appends.lock().unwrap().len(), 1);
    }
}
