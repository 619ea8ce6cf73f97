use std::{future::Future, pin::Pin};

use repopush_core::util::{join_repo_path, repo_file_name};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    ApiError,
    contents::{ContentApi, Contents},
};

/// Placeholder file that makes an otherwise-empty directory representable.
pub const FOLDER_KEEPER: &str = ".gitkeep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOp {
    Copy,
    Cut,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Cannot move a folder into itself.")]
    SelfContained,
    #[error("Source and destination are the same.")]
    SamePath,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Copy or move a file or folder within a repository. The remote API has no
/// rename primitive, so a move is copy-then-delete; directories recurse into
/// every child and stop at the first failure.
pub async fn move_or_copy(
    api: &dyn ContentApi,
    token: &str,
    owner: &str,
    repo: &str,
    source_path: &str,
    destination_path: &str,
    op: TransferOp,
) -> Result<(), TransferError> {
    transfer_item(
        api,
        token,
        owner,
        repo,
        source_path.trim_matches('/').to_string(),
        destination_path.trim_matches('/').to_string(),
        op,
    )
    .await
}

fn transfer_item<'a>(
    api: &'a dyn ContentApi,
    token: &'a str,
    owner: &'a str,
    repo: &'a str,
    source_path: String,
    destination_path: String,
    op: TransferOp,
) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>> {
    Box::pin(async move {
        let item_name = repo_file_name(&source_path).to_string();
        let new_path = join_repo_path(&destination_path, &item_name);
        // Self-containment check before any remote mutation.
        if new_path == source_path {
            return Err(TransferError::SamePath);
        }
        if new_path.starts_with(&format!("{source_path}/")) {
            return Err(TransferError::SelfContained);
        }
        match api.get_contents(token, owner, repo, &source_path).await? {
            Contents::File(file) => {
                api.put_file_base64(
                    token,
                    owner,
                    repo,
                    &new_path,
                    &file.content_base64(),
                    &format!("feat: Copy '{item_name}'"),
                )
                .await?;
                if op == TransferOp::Cut {
                    api.delete_file(
                        token,
                        owner,
                        repo,
                        &source_path,
                        &file.sha,
                        &format!("feat: Move '{item_name}' (delete original)"),
                    )
                    .await?;
                }
                Ok(())
            }
            Contents::Directory(entries) => {
                for entry in entries {
                    transfer_item(api, token, owner, repo, entry.path, new_path.clone(), op)
                        .await?;
                }
                if op == TransferOp::Cut {
                    remove_folder_keeper(api, token, owner, repo, &source_path).await;
                }
                Ok(())
            }
        }
    })
}

/// After cutting a folder's children, drop its placeholder file so the
/// now-empty source folder disappears. Best-effort.
async fn remove_folder_keeper(
    api: &dyn ContentApi,
    token: &str,
    owner: &str,
    repo: &str,
    folder_path: &str,
) {
    let keeper = join_repo_path(folder_path, FOLDER_KEEPER);
    let Ok(Contents::File(file)) = api.get_contents(token, owner, repo, &keeper).await else {
        return;
    };
    if let Err(e) = api
        .delete_file(
            token,
            owner,
            repo,
            &keeper,
            &file.sha,
            &format!("feat: Clean up folder '{folder_path}'"),
        )
        .await
    {
        tracing::warn!("Failed to remove folder keeper {}: {}", keeper, e);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    use super::*;
    use crate::contents::{DirEntry, EntryKind, FileContent};

    /// In-memory repository contents keyed by path.
    #[derive(Default)]
    struct FakeContentApi {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        mutations: AtomicUsize,
    }

    impl FakeContentApi {
        fn with_files(paths: &[(&str, &str)]) -> Self {
            let fake = Self::default();
            {
                let mut files = fake.files.lock().unwrap();
                for (path, content) in paths {
                    files.insert(path.to_string(), content.as_bytes().to_vec());
                }
            }
            fake
        }

        fn paths(&self) -> Vec<String> {
            self.files.lock().unwrap().keys().cloned().collect()
        }

        fn mutation_count(&self) -> usize { self.mutations.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl ContentApi for FakeContentApi {
        async fn get_contents(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            path: &str,
        ) -> Result<Contents, ApiError> {
            let files = self.files.lock().unwrap();
            if let Some(content) = files.get(path) {
                return Ok(Contents::File(FileContent {
                    name: repo_file_name(path).to_string(),
                    path: path.to_string(),
                    sha: format!("sha-{path}"),
                    content: STANDARD.encode(content),
                    encoding: "base64".to_string(),
                }));
            }
            let prefix = format!("{path}/");
            let mut children = BTreeMap::new();
            for key in files.keys().filter(|k| k.starts_with(&prefix)) {
                let rest = &key[prefix.len()..];
                let (name, is_dir) = match rest.split_once('/') {
                    Some((dir, _)) => (dir, true),
                    None => (rest, false),
                };
                children.insert(name.to_string(), is_dir);
            }
            if children.is_empty() {
                return Err(ApiError { message: "Not Found".to_string(), status: Some(404) });
            }
            Ok(Contents::Directory(
                children
                    .into_iter()
                    .map(|(name, is_dir)| DirEntry {
                        path: format!("{path}/{name}"),
                        sha: format!("sha-{path}/{name}"),
                        kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
                        size: 0,
                        name,
                    })
                    .collect(),
            ))
        }

        async fn put_file_base64(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            path: &str,
            content_base64: &str,
            _message: &str,
        ) -> Result<(), ApiError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            let decoded = STANDARD
                .decode(content_base64)
                .map_err(|e| ApiError::new(format!("bad base64: {e}")))?;
            self.files.lock().unwrap().insert(path.to_string(), decoded);
            Ok(())
        }

        async fn delete_file(
            &self,
            _token: &str,
            _owner: &str,
            _repo: &str,
            path: &str,
            _sha: &str,
            _message: &str,
        ) -> Result<(), ApiError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cut_single_file() {
        let api = FakeContentApi::with_files(&[("a/file.txt", "hello")]);
        move_or_copy(&api, "t", "o", "r", "a/file.txt", "b", TransferOp::Cut).await.unwrap();
        let files = api.files.lock().unwrap();
        assert_eq!(files.get("b/file.txt").map(|c| c.as_slice()), Some(b"hello".as_slice()));
        assert!(!files.contains_key("a/file.txt"));
    }

    #[tokio::test]
    async fn test_copy_keeps_original() {
        let api = FakeContentApi::with_files(&[("a/file.txt", "hello")]);
        move_or_copy(&api, "t", "o", "r", "a/file.txt", "b", TransferOp::Copy).await.unwrap();
        assert_eq!(api.paths(), ["a/file.txt", "b/file.txt"]);
    }

    #[tokio::test]
    async fn test_folder_into_own_descendant_rejected() {
        let api = FakeContentApi::with_files(&[("dir/x.txt", "x")]);
        let err = move_or_copy(&api, "t", "o", "r", "dir", "dir/sub", TransferOp::Cut)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SelfContained));
        // The check fires before any remote mutation.
        assert_eq!(api.mutation_count(), 0);
        assert_eq!(api.paths(), ["dir/x.txt"]);
    }

    #[tokio::test]
    async fn test_same_destination_rejected() {
        let api = FakeContentApi::with_files(&[("dir/x.txt", "x")]);
        let err =
            move_or_copy(&api, "t", "o", "r", "dir/x.txt", "dir", TransferOp::Cut).await.unwrap_err();
        assert!(matches!(err, TransferError::SamePath));
        assert_eq!(api.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_cut_directory_recurses_and_drops_keeper() {
        let api = FakeContentApi::with_files(&[
            ("src/a.txt", "a"),
            ("src/sub/b.txt", "b"),
            ("src/.gitkeep", ""),
        ]);
        move_or_copy(&api, "t", "o", "r", "src", "dst", TransferOp::Cut).await.unwrap();
        assert_eq!(api.paths(), ["dst/src/.gitkeep", "dst/src/a.txt", "dst/src/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_unknown_source_is_error() {
        let api = FakeContentApi::default();
        let err = move_or_copy(&api, "t", "o", "r", "missing.txt", "dst", TransferOp::Copy)
            .await
            .unwrap_err();
        let TransferError::Api(api_err) = err else { panic!("expected API error") };
        assert!(api_err.is_not_found());
    }
}
