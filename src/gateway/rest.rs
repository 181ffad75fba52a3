// src/gateway/rest.rs
// REST CRUD surface backing channels, sessions, tasks, jobs, pairing tokens,
// and signed media (§4.8). Collaborator tables per §6; exposed here because
// the Gateway is the only HTTP-facing component that can reach the Store.
//
// Grounded on the teacher's `web/api/*.rs` handler shape (one small async fn
// per route, `State<AppState>` plus path/query extractors, `Json<T>` in and
// out) and `web/api/sessions.rs`'s ownership-by-listing pattern.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{AppState, BearerUser};
use crate::error::GatewayError;
use crate::protocol::OutboundFrame;
use crate::store::models::{Channel, Job, PairingToken, Session, Task, TaskKind};
use crate::store::StoreError;

fn not_found_or_internal(e: StoreError) -> GatewayError {
    match e {
        StoreError::NotFound => GatewayError::NotFound,
        StoreError::Revoked => GatewayError::Unauthorized,
        StoreError::StateConflict(msg) => GatewayError::BadRequest(msg),
        other => GatewayError::Internal(other.into()),
    }
}

async fn require_owned_channel(state: &AppState, user_id: &str, channel_id: &str) -> Result<(), GatewayError> {
    let channels = state.store.channels.list_for_user(user_id).await.map_err(not_found_or_internal)?;
    if channels.iter().any(|c| c.id == channel_id) {
        Ok(())
    } else {
        Err(GatewayError::NotFound)
    }
}

// --- Channels -------------------------------------------------------------

pub async fn list_channels(
    BearerUser(user_id): BearerUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Channel>>, GatewayError> {
    let channels = state.store.channels.list_for_user(&user_id).await.map_err(not_found_or_internal)?;
    Ok(Json(channels))
}

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    name: String,
    openclaw_agent_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChannelWithSession {
    channel: Channel,
    session: Session,
}

pub async fn create_channel(
    BearerUser(user_id): BearerUser,
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<ChannelWithSession>, GatewayError> {
    let (channel, session) = state
        .store
        .channels
        .create_with_default_session(&user_id, &req.name, req.openclaw_agent_id.as_deref())
        .await
        .map_err(not_found_or_internal)?;

    Ok(Json(ChannelWithSession { channel, session }))
}

// --- Sessions ---------------------------------------------------------------

pub async fn list_sessions(
    BearerUser(user_id): BearerUser,
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Session>>, GatewayError> {
    require_owned_channel(&state, &user_id, &channel_id).await?;
    let sessions = state.store.channels.list_sessions(&channel_id).await.map_err(not_found_or_internal)?;
    Ok(Json(sessions))
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    name: String,
}

pub async fn create_session(
    BearerUser(user_id): BearerUser,
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, GatewayError> {
    require_owned_channel(&state, &user_id, &channel_id).await?;
    let session = state
        .store
        .channels
        .add_session(&channel_id, &req.name)
        .await
        .map_err(not_found_or_internal)?;
    Ok(Json(session))
}

pub async fn delete_session(
    BearerUser(user_id): BearerUser,
    Path((channel_id, session_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, GatewayError> {
    require_owned_channel(&state, &user_id, &channel_id).await?;
    state
        .store
        .channels
        .delete_session(&channel_id, &session_id)
        .await
        .map_err(not_found_or_internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Tasks ------------------------------------------------------------------

pub async fn list_tasks(
    BearerUser(user_id): BearerUser,
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Task>>, GatewayError> {
    require_owned_channel(&state, &user_id, &channel_id).await?;
    let tasks = state.store.tasks.list_for_channel(&channel_id).await.map_err(not_found_or_internal)?;
    Ok(Json(tasks))
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    name: String,
    kind: String,
    openclaw_cron_job_id: Option<String>,
    session_key: Option<String>,
}

pub async fn create_task(
    BearerUser(user_id): BearerUser,
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Task>, GatewayError> {
    require_owned_channel(&state, &user_id, &channel_id).await?;

    let kind = TaskKind::from_str(&req.kind)
        .ok_or_else(|| GatewayError::BadRequest(format!("unknown task kind: {}", req.kind)))?;

    let now = chrono::Utc::now().timestamp();
    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        channel_id,
        name: req.name,
        kind,
        openclaw_cron_job_id: req.openclaw_cron_job_id,
        session_key: req.session_key,
        enabled: true,
        created_at: now,
        updated_at: now,
    };

    state.store.tasks.create(&task).await.map_err(not_found_or_internal)?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct SetEnabledRequest {
    enabled: bool,
}

pub async fn set_task_enabled(
    BearerUser(_user_id): BearerUser,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<StatusCode, GatewayError> {
    state.store.tasks.set_enabled(&task_id, req.enabled).await.map_err(not_found_or_internal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_task(
    BearerUser(_user_id): BearerUser,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, GatewayError> {
    let deleted = state.store.tasks.delete(&task_id).await.map_err(not_found_or_internal)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound)
    }
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_job_limit")]
    limit: i64,
}

fn default_job_limit() -> i64 {
    50
}

pub async fn list_jobs(
    BearerUser(_user_id): BearerUser,
    Path(task_id): Path<String>,
    Query(query): Query<ListJobsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Job>>, GatewayError> {
    let jobs = state.store.jobs.list_by_task(&task_id, query.limit).await.map_err(not_found_or_internal)?;
    Ok(Json(jobs))
}

// --- Pairing tokens ----------------------------------------------------------

pub async fn list_pairing_tokens(
    BearerUser(user_id): BearerUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<PairingToken>>, GatewayError> {
    let tokens = state.store.pairing_tokens.list_for_user(&user_id).await.map_err(not_found_or_internal)?;
    Ok(Json(tokens))
}

#[derive(Deserialize)]
pub struct CreatePairingTokenRequest {
    label: Option<String>,
}

pub async fn create_pairing_token(
    BearerUser(user_id): BearerUser,
    State(state): State<AppState>,
    Json(req): Json<CreatePairingTokenRequest>,
) -> Result<Json<PairingToken>, GatewayError> {
    let token = state
        .store
        .pairing_tokens
        .create(&user_id, req.label.as_deref())
        .await
        .map_err(not_found_or_internal)?;
    Ok(Json(token))
}

pub async fn revoke_pairing_token(
    BearerUser(user_id): BearerUser,
    Path(token_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, GatewayError> {
    state
        .store
        .pairing_tokens
        .revoke(&token_id, &user_id)
        .await
        .map_err(not_found_or_internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Media --------------------------------------------------------------

/// Media keys are `media/{userId}/{epochMs}-{rand}.{ext}` (§6 Media).
#[derive(Deserialize)]
pub struct UploadMediaQuery {
    #[serde(default = "default_media_ext")]
    ext: String,
}

fn default_media_ext() -> String {
    "bin".to_string()
}

#[derive(Serialize)]
pub struct UploadMediaResponse {
    #[serde(rename = "mediaUrl")]
    media_url: String,
}

/// Uploads a media blob and returns a signed URL for it (§4.1, §6: the Store
/// owns both the object store and signed-URL issuance).
pub async fn upload_media(
    BearerUser(user_id): BearerUser,
    Query(query): Query<UploadMediaQuery>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadMediaResponse>, GatewayError> {
    let filename = format!(
        "{}-{:08x}.{}",
        chrono::Utc::now().timestamp_millis(),
        {
            use rand::RngCore;
            rand::rng().next_u32()
        },
        query.ext
    );

    state
        .store
        .media
        .put(&user_id, &filename, &body)
        .await
        .map_err(not_found_or_internal)?;

    let media_url = state.store.media.sign_url(&user_id, &filename, None);
    Ok(Json(UploadMediaResponse { media_url }))
}

#[derive(Deserialize)]
pub struct MediaQuery {
    expires: i64,
    sig: String,
}

pub async fn get_media(
    Path((user_id, filename)): Path<(String, String)>,
    Query(query): Query<MediaQuery>,
    State(state): State<AppState>,
) -> Result<Bytes, GatewayError> {
    if !state.store.media.verify_url(&user_id, &filename, query.expires, &query.sig) {
        return Err(GatewayError::Unauthorized);
    }

    let bytes = state
        .store
        .media
        .get(&user_id, &filename)
        .await
        .map_err(not_found_or_internal)?;

    Ok(Bytes::from(bytes))
}

// --- Hub RPCs ---------------------------------------------------------------

fn require_same_user(bearer: &str, path: &str) -> Result<(), GatewayError> {
    if bearer == path {
        Ok(())
    } else {
        Err(GatewayError::Forbidden)
    }
}

pub async fn hub_status(
    BearerUser(user_id): BearerUser,
    Path(path_user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<crate::hub::HubStatus>, GatewayError> {
    require_same_user(&user_id, &path_user_id)?;
    let hub = state.hubs.get(&path_user_id).await.ok_or(GatewayError::NotFound)?;
    let status = hub.status().await.map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;
    Ok(Json(status))
}

pub async fn hub_send(
    BearerUser(user_id): BearerUser,
    Path(path_user_id): Path<String>,
    State(state): State<AppState>,
    Json(frame): Json<OutboundFrame>,
) -> Result<StatusCode, GatewayError> {
    require_same_user(&user_id, &path_user_id)?;
    let hub = state.hubs.get(&path_user_id).await.ok_or(GatewayError::NotFound)?;
    hub.send(frame).await.map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    session_key: String,
    thread_id: Option<String>,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct HistoryResponse {
    messages: Vec<crate::store::models::Message>,
    reply_counts: std::collections::HashMap<String, i64>,
}

pub async fn hub_history(
    BearerUser(user_id): BearerUser,
    Path(path_user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, GatewayError> {
    require_same_user(&user_id, &path_user_id)?;

    // Thread keys (`{base}:thread:{msgId}`) aren't rows in `sessions`; only a
    // base-session lookup validates against the table directly (§4.8: missing
    // entities -> 404).
    if query.thread_id.is_none() {
        state
            .store
            .channels
            .resolve_session_key(&query.session_key)
            .await
            .map_err(not_found_or_internal)?
            .ok_or(GatewayError::NotFound)?;
    }

    let hub = state.hubs.get(&path_user_id).await.ok_or(GatewayError::NotFound)?;
    let page = hub
        .history(query.session_key, query.thread_id, query.limit)
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;

    Ok(Json(HistoryResponse {
        messages: page.messages,
        reply_counts: page.reply_counts,
    }))
}
