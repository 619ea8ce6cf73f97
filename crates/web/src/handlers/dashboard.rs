use std::collections::HashMap;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use repopush_auth::CurrentUser;
use repopush_core::AppError;
use serde_json::{Map, Value, json};

use crate::{AppState, handlers::map_api_error};

const WEEKS: usize = 52;
const TOP_LANGUAGES: usize = 5;
const RECENT_REPOS: usize = 5;

pub async fn list_repos(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Response, AppError> {
    let repos =
        state.github.list_repos(&current_user.access_token).await.map_err(map_api_error)?;
    Ok(Json(repos).into_response())
}

/// Aggregate stars, language counts, and a 52-week commit history over the
/// user's repositories. Statistics that are still computing upstream come
/// back empty and simply contribute nothing.
pub async fn analytics(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Response, AppError> {
    let repos =
        state.github.list_repos(&current_user.access_token).await.map_err(map_api_error)?;
    if repos.is_empty() {
        return Ok(Json(json!({
            "total_stars": 0,
            "language_stats": {},
            "top_language": "N/A",
            "commit_history": vec![0u64; WEEKS],
        }))
        .into_response());
    }

    let total_stars = repos.iter().map(|r| r.stargazers_count).sum::<u64>();

    let mut language_counts = HashMap::<&str, u64>::new();
    for repo in &repos {
        if let Some(language) = repo.language.as_deref() {
            *language_counts.entry(language).or_default() += 1;
        }
    }
    let mut sorted = language_counts.into_iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top_language = sorted.first().map(|(name, _)| *name).unwrap_or("N/A").to_string();
    let mut language_stats = Map::new();
    for &(name, count) in sorted.iter().take(TOP_LANGUAGES) {
        language_stats.insert(name.to_string(), Value::from(count));
    }
    let other = sorted.iter().skip(TOP_LANGUAGES).map(|(_, count)| count).sum::<u64>();
    if other > 0 {
        language_stats.insert("Other".to_string(), Value::from(other));
    }

    // The listing is already sorted by most recently updated.
    let mut commit_history = vec![0u64; WEEKS];
    for repo in repos.iter().take(RECENT_REPOS) {
        let stats = state
            .github
            .repo_stats(&current_user.access_token, &current_user.login, &repo.name)
            .await
            .map_err(map_api_error)?;
        for (week, count) in stats.owner.iter().take(WEEKS).enumerate() {
            commit_history[week] += count;
        }
    }

    Ok(Json(json!({
        "total_stars": total_stars,
        "language_stats": language_stats,
        "top_language": top_language,
        "commit_history": commit_history,
    }))
    .into_response())
}
