use anyhow::{Context, anyhow};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts, Query, State},
    http::{StatusCode, header::ACCEPT, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use octocrab::Octocrab;
use rand::{TryRngCore, rngs::OsRng};
use repopush_core::{AppError, config::GitHubConfig};
use tower_sessions::Session;

const GITHUB_OAUTH_STATE: &str = "github_oauth_state";
const CURRENT_USER: &str = "current_user";

/// Scopes needed to create, populate, and delete repositories on the user's
/// behalf.
const OAUTH_SCOPE: &str = "repo delete_repo";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CurrentUser {
    pub access_token: String,
    pub login: String,
    pub avatar_url: Option<String>,
}

pub async fn login(
    session: Session,
    State(config): State<GitHubConfig>,
    current_user: Option<CurrentUser>,
) -> Result<Response, AppError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let Some(config) = &config.oauth else {
        tracing::warn!("No GitHub OAuth config found");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, "No GitHub OAuth config").into_response());
    };
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes)?;
    let nonce = URL_SAFE_NO_PAD.encode(bytes);
    session.insert(GITHUB_OAUTH_STATE, nonce.clone()).await?;
    let mut redirect_url = url::Url::parse("https://github.com/login/oauth/authorize")?;
    let mut query = redirect_url.query_pairs_mut();
    query.append_pair("client_id", &config.client_id);
    query.append_pair("redirect_uri", &config.redirect_uri);
    query.append_pair("scope", OAUTH_SCOPE);
    query.append_pair("state", &nonce);
    drop(query);
    Ok(Redirect::to(redirect_url.as_str()).into_response())
}

pub async fn logout(session: Session) -> Result<Response, AppError> {
    session.remove_value(CURRENT_USER).await?;
    session.remove_value(GITHUB_OAUTH_STATE).await?;
    Ok(Redirect::to("/").into_response())
}

#[derive(serde::Deserialize)]
pub struct OAuthQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct OAuthResponse {
    access_token: String,
    token_type: String,
}

#[derive(serde::Serialize)]
struct FetchAccessToken<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
}

pub async fn oauth(
    session: Session,
    Query(OAuthQuery { code, state: oauth_state }): Query<OAuthQuery>,
    State(config): State<GitHubConfig>,
) -> Result<Response, AppError> {
    let existing_state = session.get::<String>(GITHUB_OAUTH_STATE).await?;
    let Some(existing_state) = existing_state else {
        tracing::warn!("No state found in session");
        return Ok((StatusCode::BAD_REQUEST, "No state found").into_response());
    };
    if existing_state != oauth_state {
        tracing::warn!("State mismatch: expected {}, got {}", existing_state, oauth_state);
        return Ok((StatusCode::BAD_REQUEST, "State mismatch").into_response());
    }
    session.remove_value(GITHUB_OAUTH_STATE).await?;

    let current_user = fetch_access_token(&config, &code).await?;
    session.insert(CURRENT_USER, current_user).await?;

    Ok(Redirect::to("/").into_response())
}

fn oauth_client() -> Octocrab {
    Octocrab::builder()
        .base_uri("https://github.com")
        .expect("Failed to create base URI")
        .add_header(ACCEPT, "application/json".to_string())
        .build()
        .expect("Failed to create Octocrab client")
}

async fn fetch_access_token(config: &GitHubConfig, code: &str) -> Result<CurrentUser, AppError> {
    let Some(oauth_config) = &config.oauth else {
        tracing::warn!("No GitHub OAuth config found");
        return Err(AppError::Internal(anyhow!("No GitHub OAuth config")));
    };
    let base_client = oauth_client();
    let response: OAuthResponse = base_client
        .post(
            "/login/oauth/access_token",
            Some(&FetchAccessToken {
                client_id: &oauth_config.client_id,
                client_secret: &oauth_config.client_secret,
                code,
            }),
        )
        .await?;
    let client = Octocrab::builder()
        .oauth(octocrab::auth::OAuth {
            access_token: response.access_token.clone().into(),
            token_type: response.token_type.clone(),
            scope: Vec::new(),
            expires_in: None,
            refresh_token: None,
            refresh_token_expires_in: None,
        })
        .build()?;
    let profile = client.current().user().await.context("Failed to fetch current user")?;
    tracing::info!("Logged in as @{}", profile.login);
    Ok(CurrentUser {
        access_token: response.access_token,
        login: profile.login,
        avatar_url: Some(profile.avatar_url.to_string()),
    })
}

impl<S> FromRequestParts<S> for CurrentUser
where
    GitHubConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        <CurrentUser as OptionalFromRequestParts<S>>::from_request_parts(parts, state)
            .await?
            .ok_or((StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    GitHubConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        Ok(session.get::<CurrentUser>(CURRENT_USER).await.ok().flatten())
    }
}
