//! A read-only stand-in for git status/metadata over a cached repository.
//! Every mutation (stage/commit/push) is a silently-accepted no-op: this
//! simulator never touches a real `.git` directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use repocache_manifest::RepositoryContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Tracked,
}

#[derive(Debug, Clone)]
pub struct GitStatus {
    pub branch: String,
    pub remote_url: String,
    pub tracked_n: usize,
    pub modified_n: usize,
    pub untracked_n: usize,
    pub clean: bool,
    pub files: BTreeMap<String, FileState>,
}

#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub repo_root: String,
    pub current_branch: String,
    pub remote_url: String,
    pub repo_name: String,
    pub is_git_repo: bool,
    pub has_remote: bool,
}

/// Owned by `Vfs`; holds a shared read-only reference into the same
/// repository context so it never needs to mutate anything the VFS owns.
pub struct GitSimulator {
    repo: Arc<RepositoryContext>,
    tracked_files: Vec<String>,
}

impl GitSimulator {
    pub fn new(repo: Arc<RepositoryContext>) -> Self {
        let mut tracked_files: Vec<String> = repo.file_index.keys().cloned().collect();
        tracked_files.sort();
        Self { repo, tracked_files }
    }

    pub fn tracked_files(&self) -> &[String] {
        &self.tracked_files
    }

    pub fn is_tracked(&self, path: &str) -> bool {
        self.repo.file_index.contains_key(path)
    }

    /// Nothing can ever diverge from the cached snapshot — there is no
    /// working tree to modify — so this is always clean with zero
    /// modified/untracked files.
    pub fn status(&self) -> GitStatus {
        let files = self
            .tracked_files
            .iter()
            .map(|p| (p.clone(), FileState::Tracked))
            .collect();

        GitStatus {
            branch: self.repo.branch.clone(),
            remote_url: self.repo.repo_url.clone(),
            tracked_n: self.tracked_files.len(),
            modified_n: 0,
            untracked_n: 0,
            clean: true,
            files,
        }
    }

    pub fn repo_info(&self) -> RepoInfo {
        RepoInfo {
            repo_root: "/".to_string(),
            current_branch: self.repo.branch.clone(),
            remote_url: self.repo.repo_url.clone(),
            repo_name: self.repo.repo_name.clone(),
            is_git_repo: true,
            has_remote: !self.repo.repo_url.is_empty(),
        }
    }

    /// No-op write barrier: the assistant may ask to stage/commit/push,
    /// and it always "succeeds" without touching anything real.
    pub fn stage(&self, _path: &str) {}
    pub fn commit(&self, _message: &str) {}
    pub fn push(&self) {}
}
