use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use repopush_auth::CurrentUser;
use repopush_core::{AppError, models::NewJob};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, TryFromMultipart)]
pub struct UploadForm {
    #[form_data(limit = "unlimited")]
    pub project: FieldData<Bytes>,
    pub repo_name: String,
    pub is_private: Option<String>,
}

/// Accept an uploaded archive and enqueue a publish job. Returns the job id
/// immediately; all remote work happens in the background worker.
pub async fn upload(
    State(state): State<AppState>,
    current_user: CurrentUser,
    TypedMultipart(form): TypedMultipart<UploadForm>,
) -> Result<Response, AppError> {
    let file_name = form.project.metadata.file_name.clone().unwrap_or_default();
    if !file_name.to_lowercase().ends_with(".zip") {
        return Ok((StatusCode::BAD_REQUEST, "Invalid file type. Please upload a .zip file.")
            .into_response());
    }
    let repo_name = form.repo_name.trim();
    if !valid_repo_name(repo_name) {
        return Ok((
            StatusCode::BAD_REQUEST,
            "Repository names may only contain letters, digits, '-', '_' and '.'.",
        )
            .into_response());
    }
    let is_private = form.is_private.as_deref().is_some_and(|v| v == "true" || v == "on");

    let archive_path = state
        .config
        .upload
        .dir
        .join(format!("{}_{}_{}.zip", current_user.login, repo_name, Uuid::new_v4()));
    tokio::fs::write(&archive_path, &form.project.contents)
        .await
        .context("Failed to save uploaded archive")?;

    let job_id = state
        .db
        .submit_job(&NewJob {
            access_token: current_user.access_token,
            archive_path: archive_path.to_string_lossy().into_owned(),
            repo_name: repo_name.to_string(),
            is_private,
        })
        .await?;
    tracing::info!("Queued publish job {} for @{}", job_id, current_user.login);
    Ok(Json(json!({ "job_id": job_id })).into_response())
}

/// Status projection for the polling client. An unknown id yields a
/// distinguished "not_found" status rather than an error.
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    match state.db.job_status(&job_id).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok(Json(json!({ "status": "not_found" })).into_response()),
    }
}

fn valid_repo_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_repo_name() {
        assert!(valid_repo_name("my-project_1.0"));
        assert!(!valid_repo_name(""));
        assert!(!valid_repo_name("has space"));
        assert!(!valid_repo_name("../escape"));
        assert!(!valid_repo_name("a/b"));
    }
}
