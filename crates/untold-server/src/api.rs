//! HTTP routing layer.
//!
//! Thin glue between the wire and the store: handlers extract ids and
//! bodies, call one store operation, and wrap the result in the
//! `{"success": true, ...}` envelope.  Errors bubble up as [`ApiError`] and
//! are mapped to status codes there.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use untold_store::{Category, Database, NewStory, ReactionTally, SortKey, Story};

use crate::auth;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::mailer::OtpMailer;
use crate::proof_store::ProofStore;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Maximum number of proof files accepted per upload request.
const MAX_PROOF_FILES: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub proofs: Arc<ProofStore>,
    pub mailer: Arc<dyn OtpMailer>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Room for a full batch of proof files plus multipart overhead.
    let body_limit = state
        .config
        .max_upload_size
        .saturating_mul(MAX_PROOF_FILES)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/health", get(health_check))
        // Stories
        .route("/stories", post(create_story).get(list_stories))
        .route("/stories/list", get(list_paginated))
        .route("/stories/search/{keyword}", get(search_stories))
        .route("/stories/category/{category}", get(stories_by_category))
        .route("/stories/sort", get(sorted_stories))
        .route("/stories/trending", get(trending_stories))
        .route("/stories/{id}", get(get_story))
        // Reactions & feedback
        .route("/stories/{id}/like", post(toggle_like))
        .route("/stories/{id}/dislike", post(toggle_dislike))
        .route("/stories/{id}/comment", post(add_comment))
        .route("/stories/{id}/report", post(report_story))
        .route("/stories/{id}/proofs", post(upload_proofs))
        .route("/stories/{id}/bookmark", post(toggle_bookmark))
        .route("/users/{id}/bookmarks", get(user_bookmarks))
        // Moderation
        .route("/admin/reports", get(admin_reports))
        .route("/admin/stories/{id}", patch(admin_set_hidden))
        .route("/admin/stories/{id}", delete(admin_delete_story))
        // Auth
        .route("/auth/send-signup-otp", post(auth::send_signup_otp))
        .route("/auth/verify-signup-otp", post(auth::verify_signup_otp))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-2fa", post(auth::verify_two_fa))
        .route("/auth/forgot", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StoryResponse {
    success: bool,
    story: Story,
}

#[derive(Serialize)]
struct ToggleResponse {
    success: bool,
    #[serde(flatten)]
    tally: ReactionTally,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdBody {
    user_id: String,
}

#[derive(Deserialize)]
struct CommentBody {
    text: String,
    author: Option<String>,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    user_id: Option<String>,
    reason: String,
    details: Option<String>,
}

#[derive(Deserialize)]
struct HiddenBody {
    hidden: bool,
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<u32>,
    skip: Option<u32>,
    category: Option<String>,
}

#[derive(Deserialize)]
struct SortParams {
    #[serde(rename = "type")]
    sort_type: Option<String>,
}

#[derive(Deserialize)]
struct TrendingParams {
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct GetStoryParams {
    /// Suppress the view-count increment for this fetch.
    #[serde(default)]
    noview: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_story(
    State(state): State<AppState>,
    Json(new): Json<NewStory>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let story = state.db.lock().await.create_story(&new)?;
    info!(id = %story.id, category = %story.category, "story submitted");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "message": "Story submitted successfully!",
            "story": story,
        })),
    ))
}

async fn list_stories(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stories = state.db.lock().await.list_visible()?;
    Ok(Json(serde_json::json!({
        "success": true,
        "stories": stories,
    })))
}

async fn list_paginated(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(20).min(100);
    let skip = params.skip.unwrap_or(0);
    let category = params
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()?;

    let (total, stories) = state.db.lock().await.list_stories(category, limit, skip)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "total": total,
        "stories": stories,
    })))
}

async fn search_stories(
    State(state): State<AppState>,
    Path(keyword): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stories = state.db.lock().await.search_stories(&keyword)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "keyword": keyword,
        "total": stories.len(),
        "stories": stories,
    })))
}

async fn stories_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let category: Category = category.parse()?;
    let stories = state.db.lock().await.list_by_category(category)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "category": category,
        "total": stories.len(),
        "stories": stories,
    })))
}

async fn sorted_stories(
    State(state): State<AppState>,
    Query(params): Query<SortParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = match params.sort_type.as_deref() {
        Some(s) => s.parse::<SortKey>()?,
        None => SortKey::Latest,
    };
    let stories = state.db.lock().await.sort_stories(key)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "stories": stories,
    })))
}

async fn trending_stories(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(10).min(50);
    let stories = state.db.lock().await.trending(limit)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "stories": stories,
    })))
}

async fn get_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<GetStoryParams>,
) -> Result<Json<StoryResponse>, ApiError> {
    let db = state.db.lock().await;
    if !params.noview {
        db.record_view(id)?;
    }
    let story = db.get_story(id)?;
    Ok(Json(StoryResponse {
        success: true,
        story,
    }))
}

async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UserIdBody>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let tally = state.db.lock().await.toggle_like(id, &body.user_id)?;
    Ok(Json(ToggleResponse {
        success: true,
        tally,
    }))
}

async fn toggle_dislike(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UserIdBody>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let tally = state.db.lock().await.toggle_dislike(id, &body.user_id)?;
    Ok(Json(ToggleResponse {
        success: true,
        tally,
    }))
}

async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let comments = state.db.lock().await.add_comment(
        id,
        &body.text,
        body.author.as_deref(),
        body.anonymous,
    )?;
    Ok(Json(serde_json::json!({
        "success": true,
        "comments": comments,
    })))
}

async fn report_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReportBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.db.lock().await.report_story(
        id,
        body.user_id.as_deref(),
        &body.reason,
        body.details.as_deref(),
    )?;
    info!(id = %id, reports = count, "story reported");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Report submitted",
        "reportsCount": count,
    })))
}

async fn upload_proofs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut refs = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        if refs.len() == MAX_PROOF_FILES {
            return Err(ApiError::BadRequest(format!(
                "too many files (max {MAX_PROOF_FILES})"
            )));
        }

        let original_name = field.file_name().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?;

        refs.push(state.proofs.store_proof(&original_name, &data).await?);
    }

    if refs.is_empty() {
        return Err(ApiError::BadRequest(
            "Missing 'files' field in multipart form".to_string(),
        ));
    }

    let proofs = state.db.lock().await.append_proofs(id, &refs)?;
    info!(id = %id, added = refs.len(), "proofs uploaded");
    Ok(Json(serde_json::json!({
        "success": true,
        "proofs": proofs,
    })))
}

async fn toggle_bookmark(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UserIdBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = Uuid::parse_str(body.user_id.trim())
        .map_err(|_| ApiError::BadRequest("invalid userId".to_string()))?;

    let (bookmarked, bookmarks) = state.db.lock().await.toggle_bookmark(user_id, id)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "bookmarked": bookmarked,
        "bookmarks": bookmarks,
    })))
}

async fn user_bookmarks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bookmarks = state.db.lock().await.bookmarks_for_user(id)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "bookmarks": bookmarks,
    })))
}

// ---------------------------------------------------------------------------
// Moderation endpoints
// ---------------------------------------------------------------------------

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ApiError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ApiError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on the admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ApiError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_reports(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    let stories = state.db.lock().await.stories_with_reports()?;
    Ok(Json(serde_json::json!({
        "success": true,
        "stories": stories,
    })))
}

async fn admin_set_hidden(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<HiddenBody>,
) -> Result<Json<StoryResponse>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    let story = state.db.lock().await.set_hidden(id, body.hidden)?;
    info!(id = %id, hidden = body.hidden, "moderation flag updated");
    Ok(Json(StoryResponse {
        success: true,
        story,
    }))
}

async fn admin_delete_story(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    if !state.db.lock().await.delete_story(id)? {
        return Err(ApiError::NotFound("story not found".to_string()));
    }
    info!(id = %id, "story deleted");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Deleted",
    })))
}

// ---------------------------------------------------------------------------
// Server entry
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::mailer::test_support::RecordingMailer;

    async fn test_state(dir: &tempfile::TempDir, admin_token: Option<&str>) -> AppState {
        let config = ServerConfig {
            admin_token: admin_token.map(String::from),
            ..ServerConfig::default()
        };
        AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            proofs: Arc::new(
                ProofStore::new(PathBuf::from(dir.path()), 1024 * 1024)
                    .await
                    .unwrap(),
            ),
            mailer: Arc::new(RecordingMailer::default()),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
            config: Arc::new(config),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    async fn seed_story(state: &AppState) -> Story {
        state
            .db
            .lock()
            .await
            .create_story(&NewStory {
                title: "Checked twice".into(),
                category: Category::Confession,
                content: "it was me".into(),
                tags: vec![],
                anonymous: true,
                author: None,
            })
            .unwrap()
    }

    #[test]
    fn admin_token_checks() {
        let enabled = ServerConfig {
            admin_token: Some("sesame".into()),
            ..ServerConfig::default()
        };
        assert!(verify_admin_token(&bearer("sesame"), &enabled).is_ok());
        assert!(verify_admin_token(&bearer("sesam"), &enabled).is_err());
        assert!(verify_admin_token(&HeaderMap::new(), &enabled).is_err());

        // Without a configured token the admin API is disabled outright.
        let disabled = ServerConfig::default();
        assert!(verify_admin_token(&bearer("sesame"), &disabled).is_err());
    }

    #[tokio::test]
    async fn get_story_counts_views_unless_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None).await;
        let story = seed_story(&state).await;

        let fetched = get_story(
            State(state.clone()),
            Path(story.id),
            Query(GetStoryParams { noview: false }),
        )
        .await
        .unwrap();
        assert_eq!(fetched.0.story.views, 1);

        let fetched = get_story(
            State(state),
            Path(story.id),
            Query(GetStoryParams { noview: true }),
        )
        .await
        .unwrap();
        assert_eq!(fetched.0.story.views, 1);
    }

    #[tokio::test]
    async fn like_handler_returns_tally_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None).await;
        let story = seed_story(&state).await;

        let response = toggle_like(
            State(state),
            Path(story.id),
            Json(UserIdBody {
                user_id: "guest-77".into(),
            }),
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&response.0).unwrap();
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["likes"], serde_json::json!(1));
        assert_eq!(json["likedBy"], serde_json::json!(["guest-77"]));
    }

    #[tokio::test]
    async fn admin_hide_and_delete_flow() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, Some("sesame")).await;
        let story = seed_story(&state).await;

        let hidden = admin_set_hidden(
            bearer("sesame"),
            State(state.clone()),
            Path(story.id),
            Json(HiddenBody { hidden: true }),
        )
        .await
        .unwrap();
        assert!(hidden.0.story.hidden);

        // Wrong token is rejected before any store access.
        let denied = admin_delete_story(bearer("wrong"), State(state.clone()), Path(story.id)).await;
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        admin_delete_story(bearer("sesame"), State(state.clone()), Path(story.id))
            .await
            .unwrap();

        let gone = admin_delete_story(bearer("sesame"), State(state), Path(story.id)).await;
        assert!(matches!(gone, Err(ApiError::NotFound(_))));
    }
}
