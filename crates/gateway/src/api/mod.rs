//! HTTP and WebSocket surface.
//!
//! Every handler is a thin shell over [`SessionManager`]: it validates the
//! request, performs one manager call and maps the outcome onto a status code.
//!
//! | Method | Path                         | Handler                         |
//! |--------|------------------------------|---------------------------------|
//! | GET    | `/health`                    | [`handlers::health`]            |
//! | POST   | `/api/ssh/connect`           | [`handlers::connect`]           |
//! | DELETE | `/api/ssh/session/:id`       | [`handlers::disconnect`]        |
//! | POST   | `/api/ssh/exec`              | [`handlers::exec`]              |
//! | GET    | `/api/terminal/:id`          | [`terminal::terminal`]          |
//! | GET    | `/api/sftp/list`             | [`handlers::list_files`]        |
//! | POST   | `/api/sftp/upload`           | [`handlers::upload_file`]       |
//! | GET    | `/api/sftp/download`         | [`handlers::download_file`]     |
//! | DELETE | `/api/sftp/delete`           | [`handlers::delete_file`]       |
//! | POST   | `/api/sftp/mkdir`            | [`handlers::create_directory`]  |
//! | POST   | `/api/sftp/rename`           | [`handlers::rename_file`]       |

pub mod error;
pub mod handlers;
pub mod terminal;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::session::SessionManager;
use crate::ssh::PtyRequest;

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    /// PTY parameters for interactive terminals.
    pub pty: PtyRequest,
}

impl AppState {
    pub fn new(manager: SessionManager, pty: PtyRequest) -> Self {
        Self { manager, pty }
    }
}

/// Router-level options taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// Allow any origin to call the API.
    pub cors_permissive: bool,
    /// Request body cap for uploads, in bytes.
    pub max_upload_size: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cors_permissive: true,
            max_upload_size: 100 * 1024 * 1024,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState, options: RouterOptions) -> Router {
    let ssh = Router::new()
        .route("/connect", post(handlers::connect))
        .route("/session/:session_id", delete(handlers::disconnect))
        .route("/exec", post(handlers::exec));

    let sftp = Router::new()
        .route("/list", get(handlers::list_files))
        .route(
            "/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(options.max_upload_size)),
        )
        .route("/download", get(handlers::download_file))
        .route("/delete", delete(handlers::delete_file))
        .route("/mkdir", post(handlers::create_directory))
        .route("/rename", post(handlers::rename_file));

    let router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/ssh", ssh)
        .nest("/api/sftp", sftp)
        .route("/api/terminal/:session_id", get(terminal::terminal))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if options.cors_permissive {
        router.layer(cors_layer())
    } else {
        router
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::MockConnector;

    fn test_router() -> Router {
        let manager = SessionManager::new(Arc::new(MockConnector::new()));
        router(
            AppState::new(manager, PtyRequest::default()),
            RouterOptions::default(),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_json() {
        let response = test_router()
            .oneshot(
                Request::post("/api/ssh/connect")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_requires_both_params() {
        let response = test_router()
            .oneshot(
                Request::get("/api/sftp/list?session_id=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "session_id and path required"
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let response = test_router()
            .oneshot(
                Request::delete("/api/ssh/session/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await["error"],
            "session not found: missing"
        );
    }

    #[tokio::test]
    async fn test_terminal_unknown_session_is_404_before_upgrade() {
        let response = test_router()
            .oneshot(
                Request::get("/api/terminal/missing")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let response = test_router()
            .oneshot(
                Request::options("/api/ssh/connect")
                    .header("origin", "http://localhost:3000")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}
