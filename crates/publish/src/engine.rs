use std::{path::Path, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use repopush_core::{
    config::{PublishConfig, PublishStrategy},
    util::repo_file_name,
};
use repopush_github::{ApiError, CreatedRepo, RepoApi, TreeEntry, transfer::FOLDER_KEEPER};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    git_cli,
    progress::{ProgressSink, blob_phase_percentage},
    stage::{self, StagedFile, StagedProject, StagingError},
};

pub const DEFAULT_BRANCH: &str = "main";
pub const COMMIT_MESSAGE: &str = "feat: Initial project upload";
const REPO_DESCRIPTION: &str = "Repository created via repopush";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The push was rejected for a known policy reason; the message is
    /// already user-facing.
    #[error("{0}")]
    PushRejected(String),
    #[error("Git push failed: {0}")]
    Git(String),
    #[error("Failed to read staged file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Publish task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub repo_url: String,
    pub repo_name: String,
}

/// Drives the publish protocol: stage, create the remote repository, upload
/// content with one of two strategies, finalize the branch reference. Any
/// failure after the remote repository exists rolls it back.
pub struct PublishEngine {
    api: Arc<dyn RepoApi>,
    config: PublishConfig,
}

impl PublishEngine {
    pub fn new(api: Arc<dyn RepoApi>, config: PublishConfig) -> Self { Self { api, config } }

    pub async fn publish(
        &self,
        token: &str,
        archive_path: &Path,
        repo_name: &str,
        is_private: bool,
        progress: &dyn ProgressSink,
    ) -> Result<PublishOutcome, PublishError> {
        progress.update("Initializing and authenticating...", 5).await;
        let owner = self.api.current_user(token).await?;
        tracing::debug!("Publishing {} for @{}", repo_name, owner);

        progress.update("Creating repository on GitHub...", 10).await;
        let created = self
            .api
            .create_repo(token, repo_name, REPO_DESCRIPTION, is_private, self.config.prime_commit)
            .await?;
        tracing::info!("Created repository {}/{}", created.owner, created.name);

        match self.publish_content(token, &created, archive_path, progress).await {
            Ok(()) => {
                progress.update("Done!", 100).await;
                Ok(PublishOutcome { repo_url: created.html_url.clone(), repo_name: created.name })
            }
            Err(e) => {
                // Failed publishes must not leave an orphaned empty
                // repository on the user's account.
                tracing::warn!(
                    "Publish of {}/{} failed, rolling back: {}",
                    created.owner,
                    created.name,
                    e
                );
                if let Err(delete_err) =
                    self.api.delete_repo(token, &created.owner, &created.name).await
                {
                    tracing::warn!(
                        "Failed to delete repository {}/{} during rollback: {}",
                        created.owner,
                        created.name,
                        delete_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn publish_content(
        &self,
        token: &str,
        created: &CreatedRepo,
        archive_path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), PublishError> {
        progress.update("Extracting project files...", 15).await;
        let staged = stage::stage(archive_path)?;
        let result = match self.config.strategy {
            PublishStrategy::Api => self.upload_via_api(token, created, &staged, progress).await,
            PublishStrategy::GitCli => {
                git_cli::publish_via_git(token, created, &staged, progress).await
            }
        };
        // Staged files are removed whether the upload succeeded or not.
        stage::cleanup(&staged.scratch_dir);
        result
    }

    async fn upload_via_api(
        &self,
        token: &str,
        created: &CreatedRepo,
        staged: &StagedProject,
        progress: &dyn ProgressSink,
    ) -> Result<(), PublishError> {
        let head = format!("heads/{DEFAULT_BRANCH}");
        let parent = if self.config.prime_commit {
            let sha = self.api.get_ref_sha(token, &created.owner, &created.name, &head).await?;
            if !has_uploadable_files(&staged.files) {
                // The priming commit already covers an effectively empty
                // project; a second commit would add nothing.
                tracing::info!(
                    "Project for {}/{} has no uploadable content beyond the priming commit",
                    created.owner,
                    created.name
                );
                return Ok(());
            }
            Some(sha)
        } else {
            None
        };

        let total = staged.files.len();
        progress.update(&format!("Preparing to upload {total} files..."), 20).await;
        let semaphore = Arc::new(Semaphore::new(self.config.blob_concurrency.max(1)));
        let mut set = JoinSet::new();
        for file in &staged.files {
            let semaphore = semaphore.clone();
            let api = self.api.clone();
            let token = token.to_string();
            let owner = created.owner.clone();
            let repo = created.name.clone();
            let abs_path = file.abs_path.clone();
            let repo_path = file.repo_path.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let content = tokio::fs::read(&abs_path).await?;
                let sha = api.create_blob(&token, &owner, &repo, &STANDARD.encode(content)).await?;
                Ok::<_, PublishError>(TreeEntry::blob(repo_path, sha))
            });
        }

        // Progress writes are serialized here, so the reported percentage is
        // non-decreasing no matter which order blobs complete in.
        let mut entries = Vec::with_capacity(total);
        while let Some(join_result) = set.join_next().await {
            let entry = match join_result {
                Ok(Ok(entry)) => entry,
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(PublishError::Task(e.to_string())),
            };
            entries.push(entry);
            let completed = entries.len();
            progress
                .update(
                    &format!("Uploading file {completed} of {total}..."),
                    blob_phase_percentage(completed, total),
                )
                .await;
        }
        // Tree order is stable regardless of upload completion order.
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        progress.update("Building repository structure...", 80).await;
        let tree_sha = self.api.create_tree(token, &created.owner, &created.name, &entries).await?;

        progress.update("Finalizing commit...", 90).await;
        let parents = parent.iter().cloned().collect::<Vec<_>>();
        let commit_sha = self
            .api
            .create_commit(token, &created.owner, &created.name, COMMIT_MESSAGE, &tree_sha, &parents)
            .await?;

        progress.update("Pushing to GitHub...", 95).await;
        if parent.is_some() {
            self.api.update_ref(token, &created.owner, &created.name, &head, &commit_sha).await?;
        } else {
            let reference = format!("refs/heads/{DEFAULT_BRANCH}");
            self.api.create_ref(token, &created.owner, &created.name, &reference, &commit_sha).await?;
        }
        Ok(())
    }
}

/// Whether the staged tree holds anything worth a commit beyond a priming
/// placeholder: at least one non-empty file that is not a folder keeper.
fn has_uploadable_files(files: &[StagedFile]) -> bool {
    files.iter().any(|f| f.size > 0 && repo_file_name(&f.repo_path) != FOLDER_KEEPER)
}
