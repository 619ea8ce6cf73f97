use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{delete, get, post},
};
use repopush_auth::CurrentUser;
use repopush_core::AppError;
use repopush_github::ApiError;
use serde_json::{Value, json};

use crate::AppState;

mod dashboard;
mod repo;
mod upload;

/// Uploaded archives can be large; the default axum body limit is far too
/// small for a zipped project.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/login", get(repopush_auth::login))
        .route("/logout", post(repopush_auth::logout))
        .route("/api/github/oauth", get(repopush_auth::oauth))
        .route("/api/upload", post(upload::upload))
        .route("/api/upload/status/{job_id}", get(upload::status))
        .route("/api/repos", get(dashboard::list_repos))
        .route("/api/dashboard/analytics", get(dashboard::analytics))
        .route("/api/repo/{repo}", delete(repo::delete_repo))
        .route("/api/repo/{repo}/contents", get(repo::contents_root))
        .route("/api/repo/{repo}/contents/{*path}", get(repo::contents))
        .route(
            "/api/repo/{repo}/file/{*path}",
            get(repo::get_file)
                .put(repo::save_file)
                .post(repo::create_file)
                .delete(repo::delete_file),
        )
        .route("/api/repo/{repo}/folder", post(repo::create_folder))
        .route("/api/repo/{repo}/move", post(repo::move_items))
        .route("/api/repo/{repo}/languages", get(repo::languages))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

async fn index(current_user: Option<CurrentUser>) -> Json<Value> {
    Json(json!({
        "service": "repopush",
        "authenticated": current_user.is_some(),
    }))
}

/// Remote 404s surface as 404s; everything else is an internal error that
/// gets logged with its upstream detail.
pub(crate) fn map_api_error(err: ApiError) -> AppError {
    if err.is_not_found() {
        AppError::Status(StatusCode::NOT_FOUND)
    } else {
        AppError::Internal(err.into())
    }
}
