//! Ambient HTTP surface: a thin axum wrapper over [`Facade`]. Every
//! handler extracts the bearer token, calls exactly one facade method,
//! and maps the result through [`ApiError`]. This is illustrative rather
//! than exhaustive — it wires up auth, spaces, notes, comments and
//! attachments; the facade itself is the complete operation surface.

use std::collections::BTreeMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use spacenote_api::Facade;
use spacenote_common::AppError;
use spacenote_db::entities::{Note, Space};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub facade: Facade,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins = cors_origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/spaces", get(list_spaces).post(create_space))
        .route("/api/spaces/{slug}", get(get_space).delete(delete_space))
        .route("/api/spaces/{slug}/notes", get(list_notes).post(create_note))
        .route("/api/spaces/{slug}/notes/{number}", get(get_note).patch(update_note))
        .route(
            "/api/spaces/{slug}/notes/{number}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/spaces/{slug}/notes/{number}/attachments/{attachment_number}",
            get(download_attachment),
        )
        .route(
            "/api/spaces/{slug}/notes/{number}/attachments/{attachment_number}/rendition",
            get(request_rendition),
        )
        .route("/api/attachments/pending", post(upload_pending_attachment))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string()
}

/// Maps an [`AppError`] to an HTTP status plus a small JSON body, the
/// server binary's only concern with error *presentation* — the facade
/// itself never picks a status code.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            AppError::ImageProcessing(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.0.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "request_failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.code(), "request_rejected");
        }
        (status, Json(json!({ "error": self.0.code(), "message": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult<Json<Value>> {
    let token = state.facade.login(&body.username, &body.password).await?;
    Ok(Json(json!({ "token": token })))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    state.facade.logout(&bearer_token(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_spaces(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Space>>> {
    let spaces = state.facade.list_spaces_for_user(&bearer_token(&headers)).await?;
    Ok(Json(spaces))
}

#[derive(Deserialize)]
struct CreateSpaceRequest {
    slug: String,
    title: String,
    description: String,
    #[serde(default)]
    members: Vec<String>,
}

async fn create_space(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSpaceRequest>,
) -> ApiResult<Json<Space>> {
    let space = state
        .facade
        .create_space(&bearer_token(&headers), &body.slug, &body.title, &body.description, body.members)
        .await?;
    Ok(Json(space))
}

async fn get_space(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> ApiResult<Json<Space>> {
    let space = state.facade.get_space(&bearer_token(&headers), &slug).await?;
    Ok(Json(space))
}

async fn delete_space(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    state.facade.delete_space(&bearer_token(&headers), &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ListNotesQuery {
    #[serde(default = "default_filter")]
    filter: String,
    query: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn default_filter() -> String {
    "all".to_string()
}

#[derive(Serialize)]
struct NoteResponse {
    #[serde(flatten)]
    note: Note,
    title: String,
}

async fn list_notes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(q): Query<ListNotesQuery>,
) -> ApiResult<Json<Value>> {
    let page = state
        .facade
        .list_notes(&bearer_token(&headers), &slug, &q.filter, q.query.as_deref(), q.limit, q.offset)
        .await?;
    let items: Vec<NoteResponse> =
        page.items.into_iter().map(|n| NoteResponse { note: n.note, title: n.title }).collect();
    Ok(Json(json!({ "items": items, "total": page.total, "limit": page.limit, "offset": page.offset })))
}

async fn create_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> ApiResult<Json<NoteResponse>> {
    let created = state.facade.create_note(&bearer_token(&headers), &slug, fields).await?;
    Ok(Json(NoteResponse { note: created.note, title: created.title }))
}

async fn get_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number)): Path<(String, i64)>,
) -> ApiResult<Json<NoteResponse>> {
    let note = state.facade.get_note(&bearer_token(&headers), &slug, number).await?;
    Ok(Json(NoteResponse { note: note.note, title: note.title }))
}

async fn update_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number)): Path<(String, i64)>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> ApiResult<Json<NoteResponse>> {
    let updated = state.facade.update_note_fields(&bearer_token(&headers), &slug, number, fields).await?;
    Ok(Json(NoteResponse { note: updated.note, title: updated.title }))
}

#[derive(Deserialize)]
struct ListCommentsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number)): Path<(String, i64)>,
    Query(q): Query<ListCommentsQuery>,
) -> ApiResult<Json<Value>> {
    let page = state.facade.list_comments(&bearer_token(&headers), &slug, number, q.limit, q.offset).await?;
    Ok(Json(json!({ "items": page.items, "total": page.total, "limit": page.limit, "offset": page.offset })))
}

#[derive(Deserialize)]
struct CreateCommentRequest {
    content: String,
    parent_number: Option<i64>,
    #[serde(default)]
    fields: Option<BTreeMap<String, String>>,
}

async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number)): Path<(String, i64)>,
    Json(body): Json<CreateCommentRequest>,
) -> ApiResult<Json<Value>> {
    let comment = state
        .facade
        .create_comment(&bearer_token(&headers), &slug, number, &body.content, body.parent_number, body.fields)
        .await?;
    Ok(Json(json!(comment)))
}

async fn download_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number, attachment_number)): Path<(String, i64, i64)>,
) -> ApiResult<Response> {
    let (attachment, bytes) = state
        .facade
        .download_attachment(&bearer_token(&headers), &slug, Some(number), attachment_number)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, attachment.mime_type.clone())],
        bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
struct RenditionQuery {
    max_width: Option<u32>,
}

async fn request_rendition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, number, attachment_number)): Path<(String, i64, i64)>,
    Query(q): Query<RenditionQuery>,
) -> ApiResult<Response> {
    let bytes = state
        .facade
        .request_rendition(&bearer_token(&headers), &slug, number, attachment_number, q.max_width)
        .await?;
    Ok(([(header::CONTENT_TYPE, "image/webp")], bytes).into_response())
}

async fn upload_pending_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let token = bearer_token(&headers);
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::ValidationFailure(format!("invalid multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else { continue };
        let mime_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| AppError::ValidationFailure(format!("failed to read upload: {e}")))?;
        let pending = state.facade.upload_pending_attachment(&token, &filename, &content, &mime_type).await?;
        return Ok(Json(json!(pending)));
    }
    Err(AppError::ValidationFailure("multipart body had no file part".to_string()).into())
}
