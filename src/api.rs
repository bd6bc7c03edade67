//! HTTP API: the remote task store and the trusted AI proxy

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ai::{AiAction, AiRequest, AiTransport, DirectTransport, ProxyResponse};
use crate::config::Config;
use crate::db::Database;
use crate::error::{AiError, StoreError};
use crate::models::{NewTask, Task, TaskPatch, ViewFilter, ViewSort};
use crate::store::TaskStore;

/// Application state shared across handlers
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    /// Upstream for the proxy endpoint, holding the server's provider key
    pub upstream: DirectTransport,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: Config, upstream: DirectTransport) -> Arc<Self> {
        Arc::new(Self {
            db,
            config,
            upstream,
        })
    }
}

/// Authenticated user id, set by the auth middleware
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route("/api/v1/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/api/v1/ai/proxy", post(ai_proxy))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint (no auth required)
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskflow",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Auth middleware - validates Bearer token and records who it belongs to
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    // Skip auth for health check
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        )
        .into_response();
    };

    let Some(user) = state.config.authenticate(token).map(str::to_string) else {
        return ApiError::new(StatusCode::UNAUTHORIZED, "Invalid API token").into_response();
    };

    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    filter: ViewFilter,
    #[serde(default)]
    sort: ViewSort,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.db.query(&user, params.filter, params.sort).await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(new_task): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.db.insert(&user, &new_task).await?;
    tracing::info!(user = %user, task_id = %task.id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    let task = state.db.update(&user, &id, &patch).await?;
    tracing::info!(user = %user, task_id = %id, "Task updated");
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.db.delete(&user, &id).await?;
    tracing::info!(user = %user, task_id = %id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ProxyRequestBody {
    action: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Trusted proxy: runs the provider call with the server-held key and
/// returns `{content}` or `{error}`
async fn ai_proxy(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ProxyRequestBody>,
) -> Response {
    let action: AiAction = match body.action.parse() {
        Ok(action) => action,
        Err(message) => return proxy_error(StatusCode::BAD_REQUEST, message),
    };

    if !state.upstream.has_credential() {
        return proxy_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AI API key not configured on server",
        );
    }

    let request = AiRequest::new(action, body.payload);
    match state.upstream.complete(&request).await {
        Ok(content) => {
            tracing::info!(user = %user, action = %action, "AI proxy call complete");
            (StatusCode::OK, Json(ProxyResponse::content(content))).into_response()
        }
        Err(err) => {
            let status = match &err {
                AiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                AiError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            };
            tracing::warn!(user = %user, action = %action, error = %err, "AI proxy call failed");
            proxy_error(status, err.to_string())
        }
    }
}

fn proxy_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ProxyResponse::error(message))).into_response()
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.message, "API error");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Database(_) | StoreError::Unavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::transport::http_client;
    use crate::ai::{ProxyTransport, TransportChain};
    use crate::ai::transport::tests::FakeTransport;
    use crate::config::{DEFAULT_API_URL, TokenConfig, hash_token};
    use crate::models::Status;
    use std::time::Duration;

    const TOKEN: &str = "tfk_test_token";

    /// Serve the router on an ephemeral port; returns its base URL
    async fn spawn_server() -> String {
        let mut config = Config::default();
        config.tokens.push(TokenConfig {
            name: "alice".to_string(),
            token_hash: hash_token(TOKEN).unwrap(),
        });
        let client = http_client(Duration::from_secs(2)).unwrap();
        // No server key: the proxy endpoint must refuse
        // Explicitly keyless, whatever the environment holds
        let upstream = DirectTransport::new(client, DEFAULT_API_URL, None);
        let db = Arc::new(Database::open_memory().unwrap());
        let app = create_router(AppState::new(db, config, upstream));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let base = spawn_server().await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn tasks_require_valid_token() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/api/v1/tasks", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .get(format!("{}/api/v1/tasks", base))
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn task_crud_round_trip() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        let tasks_url = format!("{}/api/v1/tasks", base);

        let response = client
            .post(&tasks_url)
            .bearer_auth(TOKEN)
            .json(&serde_json::json!({"title": "Buy milk", "priority": "high"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let created: Task = response.json().await.unwrap();
        assert_eq!(created.owner, "alice");

        let response = client
            .patch(format!("{}/{}", tasks_url, created.id))
            .bearer_auth(TOKEN)
            .json(&serde_json::json!({"status": "completed"}))
            .send()
            .await
            .unwrap();
        let updated: Task = response.json().await.unwrap();
        assert_eq!(updated.status, Status::Completed);
        assert!(updated.is_completed);

        let listed: Vec<Task> = client
            .get(format!("{}?filter=completed", tasks_url))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let response = client
            .delete(format!("{}/{}", tasks_url, created.id))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let response = client
            .delete(format!("{}/{}", tasks_url, created.id))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn invalid_task_is_unprocessable() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/tasks", base))
            .bearer_auth(TOKEN)
            .json(&serde_json::json!({"title": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 422);
    }

    #[tokio::test]
    async fn proxy_rejects_unknown_action() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/ai/proxy", base))
            .bearer_auth(TOKEN)
            .json(&serde_json::json!({"action": "summon", "payload": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: ProxyResponse = response.json().await.unwrap();
        assert_eq!(body.error.as_deref(), Some("Unknown action: summon"));
    }

    #[tokio::test]
    async fn keyless_proxy_triggers_client_fallback() {
        let base = spawn_server().await;
        let proxy = ProxyTransport::new(
            http_client(Duration::from_secs(2)).unwrap(),
            format!("{}/api/v1/ai/proxy", base),
            Some(TOKEN.to_string()),
        );
        let request = AiRequest::new(AiAction::Parse, serde_json::json!({"input": "milk"}));

        let err = proxy.complete(&request).await.unwrap_err();
        assert!(err.to_string().contains("AI API key not configured on server"));

        let chain = TransportChain::new()
            .with(proxy)
            .with(FakeTransport::replying(r#"[{"title":"Buy milk"}]"#));
        assert_eq!(
            chain.complete(&request).await.unwrap(),
            r#"[{"title":"Buy milk"}]"#
        );
    }
}
