use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub github: GitHubConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub oauth: Option<GitHubOAuthConfig>,
}

fn default_api_base() -> String { "https://api.github.com".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Directory where uploaded archives are held until their job completes.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Seconds to idle when no job is claimable.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds to back off after an unexpected worker error.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

fn default_poll_interval() -> u64 { 5 }

fn default_error_backoff() -> u64 { 10 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStrategy {
    /// Upload blobs through the Git Data API and assemble the commit remotely.
    #[default]
    Api,
    /// Commit locally and push with the `git` binary.
    GitCli,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub strategy: PublishStrategy,
    /// Create the repository with an initial placeholder commit and build on it.
    #[serde(default)]
    pub prime_commit: bool,
    /// Maximum number of blob uploads in flight for a single publish.
    #[serde(default = "default_blob_concurrency")]
    pub blob_concurrency: usize,
}

fn default_blob_concurrency() -> usize { 8 }

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            strategy: PublishStrategy::default(),
            prime_commit: false,
            blob_concurrency: default_blob_concurrency(),
        }
    }
}
