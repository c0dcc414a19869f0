//! The Repository Gateway boundary (§6): on-disk git plumbing, line-ending
//! normalization, and binary detection for the working tree the Structurer
//! writes into. How `git2` is driven is out of the spec's scope to dictate —
//! this crate only needs to honor the five-operation contract of §6:
//! `write`, `commit`, `tree`, `read`, `reset`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use orc_core::StructureSnapshot;
use thiserror::Error;

/// What `read` returns for a path that exists (§6, §4.5 Binary files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Decodable file contents.
    Text(Vec<u8>),
    /// The file's contents are binary; the UI renders a placeholder instead.
    Binary,
}

/// Errors surfaced at the Repository Gateway boundary (§7 kind 2/4: I/O
/// hiccups are transient at the agent boundary; an unwritable repo root at
/// startup is fatal local).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The path escapes the repository root (`..` traversal or an absolute
    /// path), rejected before touching the filesystem.
    #[error("path escapes repository root: {0}")]
    PathEscape(String),
    /// An underlying filesystem operation failed.
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The underlying git plumbing failed.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    /// `read` was asked for a path that isn't in the tree.
    #[error("no such file: {0}")]
    NotFound(String),
}

/// The Repository Gateway contract consumed by the Structurer (§4.5, §6).
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Write `bytes` to `path`, creating parent directories as needed.
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError>;
    /// Commit the working tree with `message`.
    async fn commit(&self, message: String) -> Result<(), GatewayError>;
    /// Enumerate the working tree as a nested structure snapshot.
    async fn tree(&self) -> Result<StructureSnapshot, GatewayError>;
    /// Read a file back, returning the binary sentinel result if its
    /// contents aren't decodable under the agreed (UTF-8) charset.
    async fn read(&self, path: &str) -> Result<ReadResult, GatewayError>;
    /// Delete the working tree and re-initialize an empty repository.
    async fn reset(&self) -> Result<(), GatewayError>;
}

fn validate_relative(path: &str) -> Result<PathBuf, GatewayError> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(GatewayError::PathEscape(path.to_string()));
    }
    Ok(p.to_path_buf())
}

/// Heuristic binary-content detection: a NUL byte anywhere in the first 8000
/// bytes marks a file binary, the same threshold `git`'s own core heuristic
/// uses.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|&b| b == 0) || std::str::from_utf8(bytes).is_err()
}

/// A `git2`-backed Repository Gateway rooted at a working directory.
pub struct GitRepositoryGateway {
    root: PathBuf,
    repo: Mutex<git2::Repository>,
}

impl GitRepositoryGateway {
    /// Open (initializing if necessary) a git working tree at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let repo = match git2::Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => git2::Repository::init(&root)?,
        };
        Ok(Self {
            root,
            repo: Mutex::new(repo),
        })
    }

    fn full_path(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    fn commit_blocking(&self, message: &str) -> Result<(), GatewayError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let signature = git2::Signature::now("orchestrator", "orchestrator@localhost")?;

        let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();

        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        Ok(())
    }

    fn tree_blocking(&self) -> Result<StructureSnapshot, GatewayError> {
        let mut paths = BTreeSet::new();
        collect_paths(&self.root, &self.root, &mut paths)?;
        Ok(StructureSnapshot::from_paths(paths))
    }
}

fn collect_paths(root: &Path, dir: &Path, out: &mut BTreeSet<String>) -> Result<(), GatewayError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" {
            continue;
        }
        if path.is_dir() {
            collect_paths(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel);
        }
    }
    Ok(())
}

#[async_trait]
impl RepositoryGateway for GitRepositoryGateway {
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        let rel = validate_relative(path)?;
        let full = self.full_path(&rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, bytes)?;
        Ok(())
    }

    async fn commit(&self, message: String) -> Result<(), GatewayError> {
        self.commit_blocking(&message)
    }

    async fn tree(&self) -> Result<StructureSnapshot, GatewayError> {
        self.tree_blocking()
    }

    async fn read(&self, path: &str) -> Result<ReadResult, GatewayError> {
        let rel = validate_relative(path)?;
        let full = self.full_path(&rel);
        if !full.is_file() {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        let bytes = std::fs::read(&full)?;
        if looks_binary(&bytes) {
            Ok(ReadResult::Binary)
        } else {
            Ok(ReadResult::Text(bytes))
        }
    }

    async fn reset(&self) -> Result<(), GatewayError> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            if entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// An in-memory `RepositoryGateway` fake for tests, avoiding a real
/// filesystem/git dependency in the bulk of this workspace's test suite.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    pub struct InMemoryGateway {
        files: AsyncMutex<HashMap<String, Vec<u8>>>,
        pub commits: AsyncMutex<Vec<String>>,
    }

    impl InMemoryGateway {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RepositoryGateway for InMemoryGateway {
        async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
            validate_relative(path)?;
            self.files.lock().await.insert(path.to_string(), bytes);
            Ok(())
        }

        async fn commit(&self, message: String) -> Result<(), GatewayError> {
            self.commits.lock().await.push(message);
            Ok(())
        }

        async fn tree(&self) -> Result<StructureSnapshot, GatewayError> {
            let files = self.files.lock().await;
            Ok(StructureSnapshot::from_paths(files.keys().cloned()))
        }

        async fn read(&self, path: &str) -> Result<ReadResult, GatewayError> {
            let files = self.files.lock().await;
            match files.get(path) {
                Some(bytes) if looks_binary(bytes) => Ok(ReadResult::Binary),
                Some(bytes) => Ok(ReadResult::Text(bytes.clone())),
                None => Err(GatewayError::NotFound(path.to_string())),
            }
        }

        async fn reset(&self) -> Result<(), GatewayError> {
            self.files.lock().await.clear();
            self.commits.lock().await.clear();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::InMemoryGateway;
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_text() {
        let gw = InMemoryGateway::new();
        gw.write("add.py", b"def add(a, b): return a + b".to_vec()).await.unwrap();
        let result = gw.read("add.py").await.unwrap();
        assert_eq!(result, ReadResult::Text(b"def add(a, b): return a + b".to_vec()));
    }

    #[tokio::test]
    async fn binary_contents_read_back_as_sentinel() {
        let gw = InMemoryGateway::new();
        gw.write("logo.png", vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0x01]).await.unwrap();
        let result = gw.read("logo.png").await.unwrap();
        assert_eq!(result, ReadResult::Binary);
    }

    #[tokio::test]
    async fn tree_reflects_all_written_files() {
        let gw = InMemoryGateway::new();
        gw.write("src/a.py", b"a".to_vec()).await.unwrap();
        gw.write("src/b.py", b"b".to_vec()).await.unwrap();
        let tree = gw.tree().await.unwrap();
        assert!(tree.contains_file("src/a.py"));
        assert!(tree.contains_file("src/b.py"));
    }

    #[tokio::test]
    async fn reset_clears_files_and_commits() {
        let gw = InMemoryGateway::new();
        gw.write("a.py", b"a".to_vec()).await.unwrap();
        gw.commit("initial".to_string()).await.unwrap();
        gw.reset().await.unwrap();
        assert!(gw.read("a.py").await.is_err());
        assert!(gw.commits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let gw = InMemoryGateway::new();
        let result = gw.write("../escape.py", b"x".to_vec()).await;
        assert!(matches!(result, Err(GatewayError::PathEscape(_))));
    }

    #[tokio::test]
    async fn real_git_gateway_writes_commits_and_builds_tree() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = GitRepositoryGateway::open(dir.path()).unwrap();
        gateway.write("add.py", b"def add(a, b): return a + b".to_vec()).await.unwrap();
        gateway.commit("executor: add.py".to_string()).await.unwrap();

        let tree = gateway.tree().await.unwrap();
        assert!(tree.contains_file("add.py"));

        let read_back = gateway.read("add.py").await.unwrap();
        assert_eq!(read_back, ReadResult::Text(b"def add(a, b): return a + b".to_vec()));
    }

    #[tokio::test]
    async fn real_git_gateway_reset_empties_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = GitRepositoryGateway::open(dir.path()).unwrap();
        gateway.write("a.py", b"a".to_vec()).await.unwrap();
        gateway.commit("first".to_string()).await.unwrap();
        gateway.reset().await.unwrap();
        let tree = gateway.tree().await.unwrap();
        assert!(!tree.contains_file("a.py"));
    }
}
