use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use zip::ZipArchive;

/// Directories stripped from an uploaded project before publishing:
/// dependency caches, virtual environments, VCS state, and build output.
const DENY_DIRS: &[&str] = &[
    ".git",
    "__MACOSX",
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    "vendor",
    "build",
    "dist",
    "target",
    "out",
];

/// OS metadata and secrets-prone files stripped by name.
const DENY_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", ".env"];

/// Compiled artifacts and logs stripped by extension.
const DENY_EXTENSIONS: &[&str] = &["pyc", "pyo", "class", "o", "log"];

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("The provided archive is empty or contains no valid files to upload.")]
    Empty,
    #[error("Failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Failed to stage project files: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub abs_path: PathBuf,
    /// Path inside the published repository, always forward-slash separated.
    pub repo_path: String,
    pub size: u64,
}

#[derive(Debug)]
pub struct StagedProject {
    /// Scratch directory owning everything extracted from the archive.
    pub scratch_dir: PathBuf,
    /// Effective project root; differs from `scratch_dir` for archives that
    /// nest everything inside a single top-level folder.
    pub project_root: PathBuf,
    pub files: Vec<StagedFile>,
}

/// Extract an uploaded archive into a fresh scratch directory, strip
/// ignorable paths, and enumerate what remains. The caller owns the scratch
/// directory and must pass it to [`cleanup`] when the publish attempt ends.
pub fn stage(archive_path: &Path) -> Result<StagedProject, StagingError> {
    let scratch = tempfile::Builder::new().prefix("repopush-stage-").tempdir()?.keep();
    match stage_into(archive_path, &scratch) {
        Ok(staged) => Ok(staged),
        Err(e) => {
            cleanup(&scratch);
            Err(e)
        }
    }
}

fn stage_into(archive_path: &Path, scratch: &Path) -> Result<StagedProject, StagingError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(io::BufReader::new(file))?;
    archive.extract(scratch)?;
    prune_ignorable(scratch)?;
    let project_root = detect_project_root(scratch)?;
    let mut files = Vec::new();
    collect_files(&project_root, "", &mut files)?;
    if files.is_empty() {
        return Err(StagingError::Empty);
    }
    files.sort_by(|a, b| a.repo_path.cmp(&b.repo_path));
    Ok(StagedProject { scratch_dir: scratch.to_path_buf(), project_root, files })
}

/// An archive whose entire content sits inside one top-level folder publishes
/// that folder as the repository root, avoiding a doubly-nested repository.
fn detect_project_root(scratch: &Path) -> io::Result<PathBuf> {
    let mut entries = fs::read_dir(scratch)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() == 1 {
        let entry = entries.remove(0);
        if entry.file_type()?.is_dir() {
            tracing::debug!("Using nested folder {:?} as the project root", entry.file_name());
            return Ok(entry.path());
        }
    }
    Ok(scratch.to_path_buf())
}

fn is_denied_file(name: &str) -> bool {
    DENY_FILES.contains(&name)
        || Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| DENY_EXTENSIONS.contains(&ext))
}

fn prune_ignorable(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            if DENY_DIRS.contains(&name.as_str()) {
                fs::remove_dir_all(entry.path())?;
            } else {
                prune_ignorable(&entry.path())?;
            }
        } else if is_denied_file(&name) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn collect_files(dir: &Path, prefix: &str, files: &mut Vec<StagedFile>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let repo_path =
            if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
        if entry.file_type()?.is_dir() {
            collect_files(&entry.path(), &repo_path, files)?;
        } else {
            let size = entry.metadata()?.len();
            files.push(StagedFile { abs_path: entry.path(), repo_path, size });
        }
    }
    Ok(())
}

/// Remove a staged directory tree, tolerating individual failures. Each
/// unremovable entry is logged and skipped; publish outcome never depends on
/// cleanup success.
pub fn cleanup(dir: &Path) {
    if dir.exists() {
        remove_tree(dir);
    }
}

fn remove_tree(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not read staged directory {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            remove_tree(&path);
        } else if fs::remove_file(&path).is_err() {
            // Permission-locked files get one retry as writable.
            let retried = make_writable(&path).and_then(|()| fs::remove_file(&path));
            if let Err(e) = retried {
                tracing::warn!("Could not remove staged file {}: {}", path.display(), e);
            }
        }
    }
    if let Err(e) = fs::remove_dir(dir) {
        tracing::warn!("Could not remove staged directory {}: {}", dir.display(), e);
    }
}

fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn make_zip(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.zip");
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        (dir, path)
    }

    #[test]
    fn test_stage_enumerates_files_sorted() {
        let (_dir, archive) = make_zip(&[
            ("src/main.rs", "fn main() {}"),
            ("README.md", "# hi"),
            ("src/lib.rs", "pub fn lib() {}"),
        ]);
        let staged = stage(&archive).unwrap();
        let paths = staged.files.iter().map(|f| f.repo_path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["README.md", "src/lib.rs", "src/main.rs"]);
        assert!(staged.files.iter().all(|f| f.abs_path.is_file()));
        cleanup(&staged.scratch_dir);
        assert!(!staged.scratch_dir.exists());
    }

    #[test]
    fn test_single_top_level_folder_becomes_root() {
        let (_dir, archive) = make_zip(&[
            ("myproject/README.md", "# hi"),
            ("myproject/src/main.rs", "fn main() {}"),
        ]);
        let staged = stage(&archive).unwrap();
        let paths = staged.files.iter().map(|f| f.repo_path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["README.md", "src/main.rs"]);
        assert!(staged.project_root.ends_with("myproject"));
        cleanup(&staged.scratch_dir);
    }

    #[test]
    fn test_ignorable_paths_are_stripped() {
        let (_dir, archive) = make_zip(&[
            ("app.py", "print('hi')"),
            ("app.pyc", "junk"),
            (".DS_Store", "junk"),
            (".env", "SECRET=1"),
            ("node_modules/lib/index.js", "junk"),
            ("__pycache__/app.cpython-311.pyc", "junk"),
            ("debug.log", "junk"),
        ]);
        let staged = stage(&archive).unwrap();
        let paths = staged.files.iter().map(|f| f.repo_path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["app.py"]);
        cleanup(&staged.scratch_dir);
    }

    #[test]
    fn test_only_ignorable_content_is_rejected() {
        let (_dir, archive) = make_zip(&[
            ("node_modules/lib/index.js", "junk"),
            (".DS_Store", "junk"),
        ]);
        match stage(&archive) {
            Err(StagingError::Empty) => {}
            other => panic!("expected StagingError::Empty, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"this is not a zip file").unwrap();
        assert!(matches!(stage(&path), Err(StagingError::Archive(_))));
    }
}
