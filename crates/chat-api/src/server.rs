//! Axum server and routes.

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chat_auth::IdentityResolver;
use chat_memory::MemoryService;
use chat_types::{
    BaseResponse, ChatReply, ChatRequest, Conversation, ConversationListResponse,
    ConversationResponse, CountData, CreateConversationRequest, ExistsData, HistoryData,
    LastMessagesQuery, MemoryError, MemoryResponse, MessageListResponse, MessageResponse,
    NewMessage, PostMessageRequest, RegisterUserRequest, RemovedData, SetCapacityRequest,
    ShareConversationRequest,
    TokenError, User, UserResponse,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub memory: Arc<MemoryService>,
    pub resolver: Arc<IdentityResolver>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users/sync", post(handle_sync_user))
        .route("/users/register", post(handle_register_user))
        .route(
            "/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route("/conversations/:id", delete(handle_delete_conversation))
        .route(
            "/conversations/:id/participants",
            post(handle_share_conversation),
        )
        .route(
            "/conversations/:id/participants/:user_id",
            delete(handle_remove_participant),
        )
        .route(
            "/conversations/:id/messages",
            get(handle_last_messages).post(handle_post_message),
        )
        .route("/conversations/:id/messages/count", get(handle_message_count))
        .route(
            "/conversations/:id/memory",
            get(handle_get_memory).delete(handle_clear_memory),
        )
        .route(
            "/conversations/:id/memory/capacity",
            put(handle_set_capacity),
        )
        .route("/conversations/:id/history", get(handle_history))
        .route("/conversations/:id/exists", get(handle_exists))
        .route("/conversations/:id/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response: the envelope `code` mirrors the HTTP status.
pub struct ApiError(MemoryError);

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MemoryError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            MemoryError::AccessDenied => (StatusCode::FORBIDDEN, self.0.to_string()),
            MemoryError::UserNotFound(_) | MemoryError::ConversationNotFound(_) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            MemoryError::UserAlreadyExists(_) => (StatusCode::CONFLICT, self.0.to_string()),
            MemoryError::Generation(e) => {
                tracing::error!(error = %e, "text generation failed");
                (StatusCode::BAD_GATEWAY, "text generation failed".to_string())
            }
            MemoryError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        };
        (
            status,
            Json(BaseResponse::<()>::error(status.as_u16(), message)),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            MemoryError::InvalidToken(TokenError::Malformed("missing bearer token".to_string()))
                .into()
        })
}

/// Resolve the caller from the `Authorization` header.
async fn caller(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.resolver.resolve_identity(token).await?)
}

/// Reads hide conversations the caller may not see behind a 404.
async fn require_read_access(
    state: &AppState,
    user: &User,
    conversation_id: &str,
) -> Result<(), ApiError> {
    if state.memory.user_has_access(&user.id, conversation_id).await {
        Ok(())
    } else {
        Err(MemoryError::ConversationNotFound(conversation_id.to_string()).into())
    }
}

async fn handle_sync_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<UserResponse> {
    let user = caller(&state, &headers).await?;
    tracing::info!(user_id = %user.id, "user synced");
    Ok(Json(BaseResponse::ok(user)))
}

async fn handle_register_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> ApiResult<UserResponse> {
    let user = state
        .resolver
        .register_user(&req.username, &req.email)
        .await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok(Json(BaseResponse::ok(user)))
}

async fn handle_list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<ConversationListResponse> {
    let user = caller(&state, &headers).await?;
    let list = state.memory.list_conversations(&user.id).await?;
    Ok(Json(BaseResponse::ok(list)))
}

async fn handle_create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<ConversationResponse> {
    let user = caller(&state, &headers).await?;
    let conversation = state
        .memory
        .create_conversation(&user.id, &req.title)
        .await?;
    Ok(Json(BaseResponse::ok(conversation)))
}

async fn handle_delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BaseResponse<()>> {
    let user = caller(&state, &headers).await?;
    state.memory.delete_conversation(&id, &user.id).await?;
    Ok(Json(BaseResponse::ok(())))
}

async fn handle_share_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ShareConversationRequest>,
) -> ApiResult<BaseResponse<Conversation>> {
    let user = caller(&state, &headers).await?;
    let conversation = state
        .memory
        .share_conversation(&id, &user.id, &req.user_id)
        .await?;
    Ok(Json(BaseResponse::ok(conversation)))
}

async fn handle_remove_participant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, target)): Path<(String, String)>,
) -> ApiResult<BaseResponse<RemovedData>> {
    let user = caller(&state, &headers).await?;
    let removed = state
        .memory
        .remove_participant(&id, &user.id, &target)
        .await?;
    Ok(Json(BaseResponse::ok(RemovedData { removed })))
}

async fn handle_post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<MessageResponse> {
    let user = caller(&state, &headers).await?;
    let message = state
        .memory
        .save_message(NewMessage::user(id, user.id, req.content))
        .await?;
    Ok(Json(BaseResponse::ok(message)))
}

async fn handle_last_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<LastMessagesQuery>,
) -> ApiResult<MessageListResponse> {
    let user = caller(&state, &headers).await?;
    require_read_access(&state, &user, &id).await?;
    let messages = state.memory.get_last_messages(&id, q.count).await?;
    Ok(Json(BaseResponse::ok(messages)))
}

async fn handle_message_count(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BaseResponse<CountData>> {
    let user = caller(&state, &headers).await?;
    require_read_access(&state, &user, &id).await?;
    let count = state.memory.message_count(&id).await?;
    Ok(Json(BaseResponse::ok(CountData { count })))
}

async fn handle_get_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<MemoryResponse> {
    let user = caller(&state, &headers).await?;
    require_read_access(&state, &user, &id).await?;
    let memory = state.memory.get_conversation_memory(&id).await?;
    Ok(Json(BaseResponse::ok(memory)))
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BaseResponse<HistoryData>> {
    let user = caller(&state, &headers).await?;
    require_read_access(&state, &user, &id).await?;
    let history = state.memory.get_history(&id).await?;
    Ok(Json(BaseResponse::ok(HistoryData { history })))
}

async fn handle_clear_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BaseResponse<()>> {
    let user = caller(&state, &headers).await?;
    if !state.memory.user_has_access(&user.id, &id).await {
        return Err(MemoryError::AccessDenied.into());
    }
    state.memory.clear_conversation(&id).await;
    Ok(Json(BaseResponse::ok(())))
}

async fn handle_set_capacity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SetCapacityRequest>,
) -> ApiResult<BaseResponse<()>> {
    let user = caller(&state, &headers).await?;
    if !state.memory.user_has_access(&user.id, &id).await {
        return Err(MemoryError::AccessDenied.into());
    }
    state.memory.set_max_messages(&id, req.max_messages).await?;
    Ok(Json(BaseResponse::ok(())))
}

async fn handle_exists(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BaseResponse<ExistsData>> {
    let user = caller(&state, &headers).await?;
    let exists = state.memory.user_has_access(&user.id, &id).await
        && state.memory.has_conversation(&id).await?;
    Ok(Json(BaseResponse::ok(ExistsData { exists })))
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<BaseResponse<ChatReply>> {
    let user = caller(&state, &headers).await?;
    let reply = state.memory.chat(&user.id, &id, &req.prompt).await?;
    Ok(Json(BaseResponse::ok(ChatReply { reply })))
}

async fn handle_health() -> &'static str {
    "ok"
}
