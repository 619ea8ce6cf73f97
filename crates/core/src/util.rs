/// Join repository path segments with forward slashes, ignoring empty parts.
pub fn join_repo_path(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    let name = name.trim_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// The final segment of a slash-separated repository path.
pub fn repo_file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_repo_path() {
        assert_eq!(join_repo_path("", "file.txt"), "file.txt");
        assert_eq!(join_repo_path("docs", "file.txt"), "docs/file.txt");
        assert_eq!(join_repo_path("docs/", "/file.txt"), "docs/file.txt");
        assert_eq!(join_repo_path("docs", ""), "docs");
    }

    #[test]
    fn test_repo_file_name() {
        assert_eq!(repo_file_name("a/b/c.txt"), "c.txt");
        assert_eq!(repo_file_name("c.txt"), "c.txt");
        assert_eq!(repo_file_name("a/b/"), "b");
    }
}
