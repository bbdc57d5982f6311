//! Updater-side Git mirror: clone/fetch, enumerate tags, check out a tag.
//!
//! Lives on the updater side; distinct from the host-side compose
//! directory reached through the [`crate::executor::Executor`]. When the
//! compose directory happens to be host-mounted at the same path, that is
//! coincidence this module must not assume.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::version::PackageVersion;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("working tree at {0} is dirty, refusing to check out")]
    DirtyWorkingTree(String),
}

/// A tag paired with its parsed version. Created fresh on every
/// `list_tags` call; never persisted across a mirror refresh.
#[derive(Debug, Clone)]
pub struct GitTagReference {
    pub tag_name: String,
    pub version: PackageVersion,
}

#[async_trait::async_trait]
pub trait RepositoryMirror: Send + Sync {
    async fn ensure_mirror(&self, repo_url: &str, local_path: &str) -> Result<(), MirrorError>;
    async fn fetch(&self, local_path: &str) -> Result<(), MirrorError>;
    async fn list_tags(&self, local_path: &str) -> Result<Vec<GitTagReference>, MirrorError>;
    async fn checkout(&self, local_path: &str, tag_name: &str) -> Result<(), MirrorError>;
}

/// Production mirror backed by `git2` (libgit2). Git plumbing beyond a
/// single push/checkout benefits from a real object model rather than
/// scraping subprocess output per tag.
pub struct Git2Mirror;

impl Git2Mirror {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Git2Mirror {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RepositoryMirror for Git2Mirror {
    async fn ensure_mirror(&self, repo_url: &str, local_path: &str) -> Result<(), MirrorError> {
        let repo_url = repo_url.to_string();
        let local_path = local_path.to_string();
        tokio::task::spawn_blocking(move || {
            if Path::new(&local_path).join(".git").exists() {
                debug!("mirror already present at {}", local_path);
                Ok(())
            } else {
                debug!("cloning {} into {}", repo_url, local_path);
                git2::Repository::clone(&repo_url, &local_path)?;
                Ok(())
            }
        })
        .await
        .expect("blocking task panicked")
    }

    async fn fetch(&self, local_path: &str) -> Result<(), MirrorError> {
        let local_path = local_path.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = git2::Repository::open(&local_path)?;
            let mut remote = repo.find_remote("origin")?;
            remote.fetch(&["+refs/tags/*:refs/tags/*"], None, None)?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }

    async fn list_tags(&self, local_path: &str) -> Result<Vec<GitTagReference>, MirrorError> {
        let local_path = local_path.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = git2::Repository::open(&local_path)?;
            let tag_names = repo.tag_names(None)?;
            let mut refs = Vec::new();
            for name in tag_names.iter().flatten() {
                let version = PackageVersion::parse(name);
                if version.is_valid_nonempty() {
                    refs.push(GitTagReference {
                        tag_name: name.to_string(),
                        version,
                    });
                }
            }
            Ok(refs)
        })
        .await
        .expect("blocking task panicked")
    }

    async fn checkout(&self, local_path: &str, tag_name: &str) -> Result<(), MirrorError> {
        let local_path = local_path.to_string();
        let tag_name = tag_name.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = git2::Repository::open(&local_path)?;

            let mut opts = git2::StatusOptions::new();
            opts.include_ignored(false);
            let statuses = repo.statuses(Some(&mut opts))?;
            if !statuses.is_empty() {
                return Err(MirrorError::DirtyWorkingTree(local_path));
            }

            let reference = format!("refs/tags/{}", tag_name);
            let obj = repo.revparse_single(&reference)?;
            let commit = obj.peel_to_commit()?;
            repo.checkout_tree(commit.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
            repo.set_head_detached(commit.id())?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }
}

pub mod memory {
    use super::*;
    use std::sync::Mutex;

    /// In-memory test double: a scripted tag list and a recorded checkout
    /// history, no real working tree. Lets engine tests drive every branch
    /// of the Plan/Resolve and Recover steps without a git repository.
    pub struct InMemoryMirror {
        tags: Mutex<Vec<GitTagReference>>,
        pub checkouts: Mutex<Vec<String>>,
    }

    impl InMemoryMirror {
        pub fn new(tags: Vec<(&str, &str)>) -> Self {
            let tags = tags
                .into_iter()
                .map(|(name, version)| GitTagReference {
                    tag_name: name.to_string(),
                    version: PackageVersion::parse(version),
                })
                .collect();
            Self {
                tags: Mutex::new(tags),
                checkouts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl RepositoryMirror for InMemoryMirror {
        async fn ensure_mirror(&self, _repo_url: &str, _local_path: &str) -> Result<(), MirrorError> {
            Ok(())
        }

        async fn fetch(&self, _local_path: &str) -> Result<(), MirrorError> {
            Ok(())
        }

        async fn list_tags(&self, _local_path: &str) -> Result<Vec<GitTagReference>, MirrorError> {
            Ok(self.tags.lock().unwrap().clone())
        }

        async fn checkout(&self, _local_path: &str, tag_name: &str) -> Result<(), MirrorError> {
            self.checkouts.lock().unwrap().push(tag_name.to_string());
            Ok(())
        }
    }
}
