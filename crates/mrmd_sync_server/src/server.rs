//! Server assembly.
//!
//! Everything hangs off the [`SyncHub`] built here; there is no global
//! mutable state, so multiple servers can coexist in one process on
//! distinct ports and base directories.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mrmd_core::storage::DocumentStore;

use crate::config::Config;
use crate::handlers::{AppState, http, ws};
use crate::hooks::ServerHooks;
use crate::metrics::Metrics;
use crate::sync::SyncHub;

/// A fully wired hub plus the router serving it.
pub struct SyncServer {
    pub hub: Arc<SyncHub>,
    pub router: Router,
}

/// Build a server over the given storage backend and hooks.
/// Must be called from within a tokio runtime (the hub spawns its
/// external-change router).
pub fn create_server(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    hooks: Arc<dyn ServerHooks>,
) -> SyncServer {
    let metrics = Arc::new(Metrics::new());
    let hub = SyncHub::new(config.clone(), store, hooks, metrics.clone());
    hub.start();

    let state = AppState {
        hub: hub.clone(),
        config,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(http::health))
        .route("/healthz", get(http::health))
        .route("/metrics", get(http::metrics))
        .route("/stats", get(http::stats))
        .fallback(ws::root_handler)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, intercept_request))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    SyncServer { hub, router }
}

/// Runs ahead of every built-in route, matched or not: the deployment's
/// `on_request` hook gets first refusal, and a bare `OPTIONS` to any path
/// answers 204. CORS preflights (`OPTIONS` carrying
/// `Access-Control-Request-Method`) never get this far; the `CorsLayer`
/// outside this middleware answers them itself.
async fn intercept_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some((status, body)) = state
        .hub
        .hooks()
        .on_request(request.method().as_str(), request.uri().path())
        .await
    {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        return (status, body).into_response();
    }

    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::AllowAll;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use mrmd_core::storage::TableStore;
    use tower::ServiceExt;

    fn test_server(hooks: Arc<dyn ServerHooks>) -> SyncServer {
        let config = Arc::new(Config::default());
        let store = Arc::new(TableStore::in_memory("test", "test").unwrap());
        create_server(config, store, hooks)
    }

    fn request(method: &str, path: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_bare_options_answers_204_everywhere() {
        let server = test_server(Arc::new(AllowAll));
        for path in ["/health", "/healthz", "/metrics", "/stats", "/some/doc"] {
            let response = server
                .router
                .clone()
                .oneshot(request("OPTIONS", path))
                .await
                .unwrap();
            assert_eq!(
                response.status(),
                StatusCode::NO_CONTENT,
                "OPTIONS {} should answer 204",
                path
            );
        }
    }

    #[tokio::test]
    async fn test_control_plane_routes_answer_get() {
        let server = test_server(Arc::new(AllowAll));
        for path in ["/health", "/healthz", "/metrics", "/stats"] {
            let response = server
                .router
                .clone()
                .oneshot(request("GET", path))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "GET {}", path);
        }
    }

    #[tokio::test]
    async fn test_unmatched_get_answers_the_banner() {
        let server = test_server(Arc::new(AllowAll));
        let response = server
            .router
            .oneshot(request("GET", "/no-such-route"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("mrmd-sync"));
    }

    /// A hook that claims `/health` for itself.
    struct HealthOverride;

    #[async_trait]
    impl ServerHooks for HealthOverride {
        async fn on_request(&self, _method: &str, path: &str) -> Option<(u16, String)> {
            (path == "/health").then(|| (418, "custom health".to_string()))
        }
    }

    #[tokio::test]
    async fn test_on_request_hook_precedes_built_in_routes() {
        let server = test_server(Arc::new(HealthOverride));

        let response = server
            .router
            .clone()
            .oneshot(request("GET", "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"custom health");

        // Paths the hook declines still reach the built-in routes
        let response = server
            .router
            .oneshot(request("GET", "/healthz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
