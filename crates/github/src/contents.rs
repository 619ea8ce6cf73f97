use std::{cmp::Ordering, collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::{ApiError, GitHubClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Submodule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

impl FileContent {
    /// GitHub wraps base64 payloads with newlines; strip them before reuse.
    pub fn content_base64(&self) -> String {
        self.content.chars().filter(|c| !c.is_whitespace()).collect()
    }

    pub fn decoded(&self) -> Result<Vec<u8>, ApiError> {
        STANDARD
            .decode(self.content_base64())
            .map_err(|e| ApiError::new(format!("Invalid base64 content from GitHub: {e}")))
    }
}

/// Contents of a repository path: the API returns a list for a directory and
/// a single object for a file. The shape is decided exactly once, here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Contents {
    File(FileContent),
    Directory(Vec<DirEntry>),
}

fn parse_contents(value: Value) -> Result<Contents, ApiError> {
    match value {
        Value::Array(values) => {
            let mut entries = values
                .into_iter()
                .map(serde_json::from_value::<DirEntry>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ApiError::new(format!("Invalid directory listing: {e}")))?;
            entries.sort_by(dir_order);
            Ok(Contents::Directory(entries))
        }
        value @ Value::Object(_) => serde_json::from_value(value)
            .map(Contents::File)
            .map_err(|e| ApiError::new(format!("Invalid file content response: {e}"))),
        _ => Err(ApiError::new("Contents response is neither a file nor a directory listing")),
    }
}

/// Directories before files, then case-insensitive by name.
fn dir_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.kind == EntryKind::Dir;
    let b_dir = b.kind == EntryKind::Dir;
    b_dir.cmp(&a_dir).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

/// Repository content operations used by the move/copy utility.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn get_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Contents, ApiError>;

    async fn put_file_base64(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        content_base64: &str,
        message: &str,
    ) -> Result<(), ApiError>;

    async fn delete_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), ApiError>;
}

#[async_trait]
impl ContentApi for GitHubClient {
    async fn get_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Contents, ApiError> {
        let value = self
            .request(Method::GET, &format!("repos/{owner}/{repo}/contents/{path}"), token, None, None)
            .await?;
        parse_contents(value)
    }

    async fn put_file_base64(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        content_base64: &str,
        message: &str,
    ) -> Result<(), ApiError> {
        let body = json!({ "message": message, "content": content_base64 });
        self.request(
            Method::PUT,
            &format!("repos/{owner}/{repo}/contents/{path}"),
            token,
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), ApiError> {
        let body = json!({ "message": message, "sha": sha });
        self.request(
            Method::DELETE,
            &format!("repos/{owner}/{repo}/contents/{path}"),
            token,
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }
}

/// A file prepared for the web editor: text content when decodable, flagged
/// binary otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct EditableFile {
    pub content: String,
    pub sha: String,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub html_url: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Weekly commit counts; `Default` doubles as the "not available" result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participation {
    #[serde(default)]
    pub all: Vec<u64>,
    #[serde(default)]
    pub owner: Vec<u64>,
}

const STATS_ATTEMPTS: u32 = 5;
const STATS_POLL_DELAY: Duration = Duration::from_secs(2);

impl GitHubClient {
    pub async fn get_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<EditableFile, ApiError> {
        let Contents::File(file) = self.get_contents(token, owner, repo, path).await? else {
            return Err(ApiError::new("File content not available (it may be a directory)"));
        };
        let bytes = file.decoded()?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(EditableFile { content, sha: file.sha, is_binary: false }),
            // Binary content is never sent to the web editor.
            Err(_) => Ok(EditableFile { content: String::new(), sha: file.sha, is_binary: true }),
        }
    }

    /// Commit a change to a single file. `sha` is required when updating an
    /// existing file and absent when creating a new one.
    pub async fn put_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut body = json!({ "message": message, "content": STANDARD.encode(content) });
        if let Some(sha) = sha {
            body["sha"] = Value::String(sha.to_string());
        }
        self.request(
            Method::PUT,
            &format!("repos/{owner}/{repo}/contents/{path}"),
            token,
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }

    /// Create a folder by committing a placeholder file inside it, since the
    /// content model has no empty directories.
    pub async fn create_folder(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        folder_path: &str,
    ) -> Result<(), ApiError> {
        let keeper = format!("{}/{}", folder_path.trim_end_matches('/'), crate::transfer::FOLDER_KEEPER);
        self.put_file(
            token,
            owner,
            repo,
            &keeper,
            "",
            &format!("feat: Create folder '{folder_path}'"),
            None,
        )
        .await
    }

    pub async fn list_repos(&self, token: &str) -> Result<Vec<RepoSummary>, ApiError> {
        let value = self
            .request(Method::GET, "user/repos?sort=updated&per_page=100", token, None, None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::new(format!("Invalid repository listing: {e}")))
    }

    /// Fetch participation statistics. GitHub answers 202 while it computes
    /// them in the background; poll a few times with a fixed delay and fall
    /// back to an empty result so callers never block indefinitely. Callers
    /// must treat an empty result as "unavailable", not as an error.
    pub async fn repo_stats(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Participation, ApiError> {
        let path = format!("repos/{owner}/{repo}/stats/participation");
        for attempt in 0..STATS_ATTEMPTS {
            let value = self.request(Method::GET, &path, token, None, None).await?;
            if value.get("all").is_some() {
                return serde_json::from_value(value)
                    .map_err(|e| ApiError::new(format!("Invalid statistics response: {e}")));
            }
            if attempt + 1 < STATS_ATTEMPTS {
                sleep(STATS_POLL_DELAY).await;
            }
        }
        tracing::debug!("Statistics for {}/{} not ready after {} attempts", owner, repo, STATS_ATTEMPTS);
        Ok(Participation::default())
    }

    pub async fn repo_languages(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<BTreeMap<String, u64>, ApiError> {
        let value = self
            .request(Method::GET, &format!("repos/{owner}/{repo}/languages"), token, None, None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::new(format!("Invalid language breakdown: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_listing_is_sorted() {
        let value = json!([
            { "name": "zeta.rs", "path": "src/zeta.rs", "sha": "1", "type": "file", "size": 10 },
            { "name": "Alpha.rs", "path": "src/Alpha.rs", "sha": "2", "type": "file", "size": 5 },
            { "name": "tests", "path": "src/tests", "sha": "3", "type": "dir" },
            { "name": "bin", "path": "src/bin", "sha": "4", "type": "dir" },
        ]);
        let Contents::Directory(entries) = parse_contents(value).unwrap() else {
            panic!("expected a directory");
        };
        let names = entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["bin", "tests", "Alpha.rs", "zeta.rs"]);
    }

    #[test]
    fn test_single_file_parses_as_file() {
        let value = json!({
            "name": "README.md",
            "path": "README.md",
            "sha": "abc",
            "type": "file",
            "content": "aGVs\nbG8=\n",
            "encoding": "base64",
        });
        let Contents::File(file) = parse_contents(value).unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(file.content_base64(), "aGVsbG8=");
        assert_eq!(file.decoded().unwrap(), b"hello");
    }

    #[test]
    fn test_scalar_contents_rejected() {
        assert!(parse_contents(json!("nonsense")).is_err());
        assert!(parse_contents(Value::Null).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_stuck_at_202_return_empty_success() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // GitHub keeps answering 202 while statistics are computed; after the
        // fifth attempt the client gives up with an empty successful result.
        let server = tokio::spawn(async move {
            let mut served = 0usize;
            while served < 5 {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
                served += 1;
            }
            served
        });
        let client = crate::GitHubClient::new(&format!("http://{addr}")).unwrap();
        let stats = client.repo_stats("token", "octocat", "project").await.unwrap();
        assert!(stats.all.is_empty());
        assert!(stats.owner.is_empty());
        assert_eq!(server.await.unwrap(), 5);
    }
}
