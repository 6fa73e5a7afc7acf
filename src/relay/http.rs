use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::RelayError;
use crate::relay::state::RelayState;

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/auth/register", axum::routing::post(register))
        .route("/auth/login", axum::routing::post(login))
        .route("/auth/users/{user_id}", axum::routing::get(get_user))
        .route("/auth/check-userid/{user_id}", axum::routing::get(check_user_id))
        .route(
            "/user/descriptions/{user_id}",
            axum::routing::get(get_descriptions),
        )
        .route("/user/descriptions", axum::routing::post(set_descriptions))
        .route("/active-users", axum::routing::get(active_users))
        .route("/direct-message/", axum::routing::post(direct_message))
        .route("/register-document/", axum::routing::post(register_document))
        .route("/ws", axum::routing::get(crate::relay::connection::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Result<String, RelayError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or(RelayError::Unauthorized)
}

async fn authenticate(state: &RelayState, headers: &HeaderMap) -> Result<String, RelayError> {
    let token = bearer_token(headers)?;
    state.auth.verify_token(&token).await
}

#[derive(Deserialize)]
struct RegisterRequest {
    user_id: String,
    username: String,
    public_key: String,
}

async fn register(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, RelayError> {
    state
        .identity
        .register(&body.user_id, &body.username, &body.public_key)
        .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct LoginRequest {
    user_id: String,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(serde::Deserialize)]
struct VerifyQuery {
    #[serde(default)]
    verify: bool,
}

async fn login(
    State(state): State<Arc<RelayState>>,
    axum::extract::Query(query): axum::extract::Query<VerifyQuery>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, RelayError> {
    if query.verify {
        let signature = body
            .signature
            .ok_or_else(|| RelayError::BadRequest("signature required".into()))?;
        let token = state.auth.verify_login(&body.user_id, &signature).await?;
        Ok(Json(json!({ "token": token })))
    } else {
        let challenge = state.auth.begin_login(&body.user_id).await;
        Ok(Json(json!({ "challenge": B64.encode(challenge) })))
    }
}

async fn get_user(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    authenticate(&state, &headers).await?;
    let user = state.identity.get_user(&user_id).await?;
    Ok(Json(
        json!({ "user_id": user.user_id, "public_key": user.public_key }),
    ))
}

async fn check_user_id(
    State(state): State<Arc<RelayState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let exists = state.identity.user_exists(&user_id).await?;
    Ok(Json(json!({ "exists": exists })))
}

async fn get_descriptions(
    State(state): State<Arc<RelayState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let descriptions = state.storage.get_descriptions(&user_id).await?;
    Ok(Json(descriptions))
}

async fn set_descriptions(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(descriptions): Json<Vec<String>>,
) -> Result<impl IntoResponse, RelayError> {
    let user_id = authenticate(&state, &headers).await?;
    if descriptions.is_empty() {
        return Err(RelayError::BadRequest("descriptions must not be empty".into()));
    }
    state.storage.set_descriptions(&user_id, &descriptions).await?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct ActiveUsers {
    online: Vec<String>,
    offline: Vec<String>,
}

async fn active_users(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RelayError> {
    authenticate(&state, &headers).await?;
    let online = state.connected_user_ids().await;
    let online_set: std::collections::HashSet<&str> = online.iter().map(String::as_str).collect();
    let offline = state
        .storage
        .list_user_ids()
        .await?
        .into_iter()
        .filter(|user_id| !online_set.contains(user_id.as_str()))
        .collect();
    Ok(Json(ActiveUsers { online, offline }))
}

/// `POST /direct-message/` — always routed to the authenticated caller's
/// own inbox, regardless of any recipient field in the body, since the
/// downstream RAG/LLM collaborator this endpoint fronts is out of scope
/// for this crate. The handler reports it unavailable without attempting
/// a live answer.
async fn direct_message(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(_body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, RelayError> {
    authenticate(&state, &headers).await?;
    Ok(Json(json!({
        "success": false,
        "answer": "no retrieval-augmented-generation collaborator is configured"
    })))
}

/// `POST /register-document/` — the RAG document index is an external
/// collaborator out of scope for this crate; acknowledge the wire
/// contract without indexing anything.
async fn register_document(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, RelayError> {
    authenticate(&state, &headers).await?;
    let doc_type = body.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
    Ok(Json(json!({
        "success": false,
        "message": "document registration collaborator not configured in this build",
        "type": doc_type
    })))
}
