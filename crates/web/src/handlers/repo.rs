use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use repopush_auth::CurrentUser;
use repopush_core::{AppError, util::repo_file_name};
use repopush_github::{
    RepoApi,
    contents::ContentApi,
    transfer::{self, TransferError, TransferOp},
};
use serde::Deserialize;
use serde_json::json;

use crate::{AppState, handlers::map_api_error};

pub async fn contents_root(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(repo): Path<String>,
) -> Result<Response, AppError> {
    list_contents(&state, &current_user, &repo, "").await
}

pub async fn contents(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((repo, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    list_contents(&state, &current_user, &repo, &path).await
}

async fn list_contents(
    state: &AppState,
    current_user: &CurrentUser,
    repo: &str,
    path: &str,
) -> Result<Response, AppError> {
    let contents = state
        .github
        .get_contents(&current_user.access_token, &current_user.login, repo, path)
        .await
        .map_err(map_api_error)?;
    Ok(Json(contents).into_response())
}

pub async fn get_file(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((repo, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let file = state
        .github
        .get_file(&current_user.access_token, &current_user.login, &repo, &path)
        .await
        .map_err(map_api_error)?;
    Ok(Json(file).into_response())
}

#[derive(Deserialize)]
pub struct SaveFileRequest {
    pub content: String,
    pub commit_message: String,
    pub sha: String,
}

pub async fn save_file(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((repo, path)): Path<(String, String)>,
    Json(request): Json<SaveFileRequest>,
) -> Result<Response, AppError> {
    state
        .github
        .put_file(
            &current_user.access_token,
            &current_user.login,
            &repo,
            &path,
            &request.content,
            &request.commit_message,
            Some(&request.sha),
        )
        .await
        .map_err(map_api_error)?;
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn create_file(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((repo, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let name = repo_file_name(&path);
    state
        .github
        .put_file(
            &current_user.access_token,
            &current_user.login,
            &repo,
            &path,
            "",
            &format!("feat: Create new file '{name}'"),
            None,
        )
        .await
        .map_err(map_api_error)?;
    Ok(Json(json!({ "success": true })).into_response())
}

#[derive(Deserialize)]
pub struct DeleteFileRequest {
    pub sha: String,
}

pub async fn delete_file(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((repo, path)): Path<(String, String)>,
    Json(request): Json<DeleteFileRequest>,
) -> Result<Response, AppError> {
    let name = repo_file_name(&path);
    state
        .github
        .delete_file(
            &current_user.access_token,
            &current_user.login,
            &repo,
            &path,
            &request.sha,
            &format!("feat: Delete '{name}'"),
        )
        .await
        .map_err(map_api_error)?;
    Ok(Json(json!({ "success": true })).into_response())
}

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    pub path: String,
}

pub async fn create_folder(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(repo): Path<String>,
    Json(request): Json<CreateFolderRequest>,
) -> Result<Response, AppError> {
    state
        .github
        .create_folder(&current_user.access_token, &current_user.login, &repo, &request.path)
        .await
        .map_err(map_api_error)?;
    Ok(Json(json!({ "success": true })).into_response())
}

/// One or many source paths; single-item moves arrive as a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub source_path: OneOrMany,
    #[serde(default)]
    pub destination_path: String,
    pub operation: TransferOp,
}

/// Move or copy one or more items. Stops at the first failure, leaving the
/// remaining sources untouched.
pub async fn move_items(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(repo): Path<String>,
    Json(request): Json<MoveRequest>,
) -> Result<Response, AppError> {
    for source in request.source_path.into_vec() {
        let result = transfer::move_or_copy(
            &*state.github,
            &current_user.access_token,
            &current_user.login,
            &repo,
            &source,
            &request.destination_path,
            request.operation,
        )
        .await;
        match result {
            Ok(()) => {}
            Err(e @ (TransferError::SelfContained | TransferError::SamePath)) => {
                return Ok((StatusCode::BAD_REQUEST, e.to_string()).into_response());
            }
            Err(TransferError::Api(e)) => return Err(map_api_error(e)),
        }
    }
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn languages(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(repo): Path<String>,
) -> Result<Response, AppError> {
    let languages = state
        .github
        .repo_languages(&current_user.access_token, &current_user.login, &repo)
        .await
        .map_err(map_api_error)?;
    Ok(Json(languages).into_response())
}

pub async fn delete_repo(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(repo): Path<String>,
) -> Result<Response, AppError> {
    state
        .github
        .delete_repo(&current_user.access_token, &current_user.login, &repo)
        .await
        .map_err(map_api_error)?;
    tracing::info!("Deleted repository {}/{}", current_user.login, repo);
    Ok(Json(json!({ "success": true })).into_response())
}
