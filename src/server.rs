//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/auth/google/login` | – | Redirect to Google's consent screen |
//! | `GET` | `/auth/google/callback` | – | Finish login, redirect to the frontend with a token |
//! | `GET` | `/health` | – | Health check (returns version) |
//! | `GET` | `/` | bearer | Greeting for the signed-in user |
//! | `GET` | `/me` | bearer | The signed-in user's profile |
//! | `POST` | `/upload` | bearer | Multipart PDF upload (`file` parts, optional `source`) |
//! | `POST` | `/ask` | bearer | `{ "question": "...", "source"?: "report" }` → `{ "answer": "..." }` |
//! | `GET` | `/documents` | bearer | Indexed files with chunk counts |
//! | `DELETE` | `/documents/{filename}` | bearer | Delete one file's chunks |
//! | `DELETE` | `/documents` | bearer | Delete all of the user's chunks |
//!
//! Errors use the JSON contract described in [`crate::error`].
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser frontend
//! can be served from a different origin.

use axum::{
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{require_user, sign_state, verify_state, GoogleOAuth, TokenSigner};
use crate::config::{Config, Secrets};
use crate::error::{bad_request, internal, AppError, PipelineError};
use crate::ingest::{ingest_files, UploadedFile};
use crate::models::{DocumentSummary, SourceTag, User};
use crate::retrieval::answer_question;
use crate::services::Services;
use crate::users::{NewUser, UserStore};
use crate::vector_store::PointFilter;
use crate::{db, migrate};

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub secrets: Arc<Secrets>,
    pub services: Services,
    pub users: UserStore,
    pub tokens: TokenSigner,
    pub oauth: Arc<GoogleOAuth>,
}

impl AppState {
    /// Open the user store and wire up the auth helpers around `services`.
    pub async fn new(config: &Config, secrets: &Secrets, services: Services) -> anyhow::Result<Self> {
        let pool = db::connect(&config.db).await?;
        migrate::run_migrations(&pool).await?;

        Ok(Self {
            config: Arc::new(config.clone()),
            secrets: Arc::new(secrets.clone()),
            services,
            users: UserStore::new(pool),
            tokens: TokenSigner::new(&secrets.secret_key, config.auth.token_ttl_hours),
            oauth: Arc::new(GoogleOAuth::new(config, secrets)?),
        })
    }
}

/// Start the server with secrets from the environment and the configured
/// models. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let secrets = Secrets::from_env(config)?;
    let services = Services::from_config(config, &secrets).await?;
    run_server_with_services(config, &secrets, services).await
}

/// Start the server around already-built [`Services`].
pub async fn run_server_with_services(
    config: &Config,
    secrets: &Secrets,
    services: Services,
) -> anyhow::Result<()> {
    let state = AppState::new(config, secrets, services).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "docquery listening");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_request_bytes = state.config.server.max_request_bytes;

    let protected = Router::new()
        .route("/", get(handle_root))
        .route("/me", get(handle_me))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(max_request_bytes)),
        )
        .route("/ask", post(handle_ask))
        .route(
            "/documents",
            get(handle_list_documents).delete(handle_delete_all),
        )
        .route("/documents/{filename}", delete(handle_delete_document))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/google/login", get(handle_login))
        .route("/auth/google/callback", get(handle_callback))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ OAuth ============

async fn handle_login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let oauth_state = sign_state(
        &state.secrets.secret_key,
        state.config.auth.state_ttl_secs,
        chrono::Utc::now(),
    );
    let url = state
        .oauth
        .authorize_url(&oauth_state)
        .map_err(|e| internal(format!("Invalid authorization URL: {}", e)))?;
    Ok(Redirect::to(&url))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// `{frontend}?{key}={value}`
fn frontend_url(state: &AppState, key: &str, value: &str) -> Result<String, AppError> {
    reqwest::Url::parse_with_params(&state.secrets.frontend_redirect_url, &[(key, value)])
        .map(|u| u.to_string())
        .map_err(|e| internal(format!("Invalid FRONTEND_REDIRECT_URL: {}", e)))
}

async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, AppError> {
    let state_ok = params
        .state
        .as_deref()
        .is_some_and(|s| verify_state(&state.secrets.secret_key, s, chrono::Utc::now()));
    if !state_ok {
        tracing::warn!("OAuth callback with missing or invalid state");
        return Ok(Redirect::to(&frontend_url(
            &state,
            "error",
            "csrf_state_mismatch",
        )?));
    }

    if let Some(error) = params.error {
        return Err(bad_request(format!("Authentication failed: {}", error)));
    }
    let code = params
        .code
        .ok_or_else(|| bad_request("Authentication failed: missing authorization code"))?;

    let access_token = state.oauth.exchange_code(&code).await.map_err(|e| {
        tracing::warn!("OAuth token exchange failed: {:#}", e);
        bad_request(format!("Authentication failed during token exchange: {}", e))
    })?;
    let info = state
        .oauth
        .fetch_userinfo(&access_token)
        .await
        .map_err(|e| bad_request(format!("Failed to fetch user info: {}", e)))?;

    let (Some(sub), Some(email)) = (
        info.sub.filter(|s| !s.is_empty()),
        info.email.filter(|e| !e.is_empty()),
    ) else {
        return Err(bad_request(
            "Google login failed: Incomplete user information received.",
        ));
    };

    let user = state
        .users
        .upsert(NewUser {
            id: sub,
            name: info.name.unwrap_or_else(|| "Unknown".to_string()),
            email,
            picture: info.picture,
        })
        .await?;
    tracing::info!(user_id = %user.id, "user signed in");

    let token = state
        .tokens
        .issue(&user)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Redirect::to(&frontend_url(&state, "token", &token)?))
}

// ============ GET / and GET /me ============

async fn handle_root(Extension(user): Extension<User>) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("Welcome, {}! Upload a report or ask a question.", user.name) }))
}

async fn handle_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

// ============ POST /upload ============

async fn handle_upload(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut files = Vec::new();
    let mut source = state.config.retrieval.default_source;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "source" {
            let value = field
                .text()
                .await
                .map_err(|e| bad_request(format!("Failed to read source: {}", e)))?;
            source = value.parse::<SourceTag>().map_err(bad_request)?;
            continue;
        }

        let Some(filename) = field.file_name().map(str::to_string) else {
            tracing::debug!(field = %name, "ignoring non-file multipart field");
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Failed to read '{}': {}", filename, e)))?;

        tracing::info!(user_id = %user.id, %filename, bytes = bytes.len(), "received upload");
        files.push(UploadedFile {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(bad_request("No files uploaded"));
    }

    let summary = ingest_files(&state.services, &state.config, &user.id, source, files).await;

    let status = if summary.any_indexed() {
        StatusCode::OK
    } else if summary.all_rejected() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(summary)).into_response())
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    source: Option<SourceTag>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let source = request
        .source
        .unwrap_or(state.config.retrieval.default_source);

    let answer = answer_question(
        &state.services,
        &state.config.retrieval,
        &user.id,
        source,
        &request.question,
    )
    .await?;

    Ok(Json(AskResponse { answer }))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
    total_chunks: usize,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = state
        .services
        .store
        .list_documents(&PointFilter::for_user(&user.id))
        .await
        .map_err(PipelineError::VectorStore)?;
    let total_chunks = documents.iter().map(|d| d.chunks).sum();

    Ok(Json(DocumentListResponse {
        documents,
        total_chunks,
    }))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = PointFilter::for_user(&user.id).with_filename(&filename);
    let deleted = state
        .services
        .store
        .delete(&filter)
        .await
        .map_err(PipelineError::VectorStore)?;

    if deleted == 0 {
        return Err(PipelineError::NotFound(format!("No document named '{}'", filename)).into());
    }
    tracing::info!(user_id = %user.id, %filename, deleted, "deleted document");

    Ok(Json(json!({ "filename": filename, "deleted_chunks": deleted })))
}

async fn handle_delete_all(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = state
        .services
        .store
        .delete(&PointFilter::for_user(&user.id))
        .await
        .map_err(PipelineError::VectorStore)?;
    tracing::info!(user_id = %user.id, deleted, "deleted all documents");

    Ok(Json(json!({ "deleted_chunks": deleted })))
}
