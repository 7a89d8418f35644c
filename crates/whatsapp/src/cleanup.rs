//! Best-effort removal of stale browser session files before a forced
//! reconnect.

use std::path::{Path, PathBuf};

use {async_trait::async_trait, tracing::warn, walkdir::WalkDir};

/// Result of one attempted removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub path: PathBuf,
    pub error: Option<String>,
}

impl CleanupOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Removes session/lock artifacts left behind by a previous transport.
///
/// Callers only rely on the purge having been attempted; individual
/// outcomes are reported for logging.
#[async_trait]
pub trait SessionCleaner: Send + Sync {
    async fn purge(&self) -> Vec<CleanupOutcome>;
}

/// Filesystem cleaner: lock files anywhere under the auth dir, plus the whole
/// cache dir.
#[derive(Debug, Clone)]
pub struct FsSessionCleaner {
    auth_dir: PathBuf,
    cache_dir: PathBuf,
    lock_files: Vec<String>,
}

impl FsSessionCleaner {
    pub fn new(auth_dir: PathBuf, cache_dir: PathBuf, lock_files: Vec<String>) -> Self {
        Self {
            auth_dir,
            cache_dir,
            lock_files,
        }
    }

    pub fn from_config(cfg: &wagate_config::CleanupConfig) -> Self {
        Self::new(
            cfg.auth_dir.clone(),
            cfg.cache_dir.clone(),
            cfg.lock_files.clone(),
        )
    }

    fn purge_blocking(&self) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::new();

        if self.auth_dir.is_dir() {
            let locks = WalkDir::new(&self.auth_dir)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable session path");
                        None
                    },
                })
                .filter(|entry| !entry.file_type().is_dir())
                .filter(|entry| {
                    let name = entry.file_name().to_string_lossy();
                    self.lock_files.iter().any(|lock| *lock == name)
                });
            for entry in locks {
                outcomes.push(remove(entry.path(), |p| std::fs::remove_file(p)));
            }
        }

        if std::fs::symlink_metadata(&self.cache_dir).is_ok() {
            outcomes.push(remove(&self.cache_dir, |p| std::fs::remove_dir_all(p)));
        }

        outcomes
    }
}

fn remove(path: &Path, op: fn(&Path) -> std::io::Result<()>) -> CleanupOutcome {
    CleanupOutcome {
        path: path.to_path_buf(),
        error: op(path).err().map(|e| e.to_string()),
    }
}

#[async_trait]
impl SessionCleaner for FsSessionCleaner {
    async fn purge(&self) -> Vec<CleanupOutcome> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.purge_blocking()).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "session cleanup task failed");
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner(root: &Path) -> FsSessionCleaner {
        FsSessionCleaner::new(root.join("auth"), root.join("cache"), vec![
            "SingletonLock".into(),
            "SingletonSocket".into(),
        ])
    }

    #[test]
    fn outcome_with_error_is_a_failure() {
        let failed = CleanupOutcome {
            path: PathBuf::from("auth/SingletonLock"),
            error: Some("permission denied".into()),
        };
        assert!(!failed.succeeded());
    }

    #[tokio::test]
    async fn removes_nested_locks_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("auth/session/Default");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(dir.path().join("auth/session/SingletonLock"), b"").unwrap();
        std::fs::write(profile.join("SingletonSocket"), b"").unwrap();
        std::fs::write(profile.join("Cookies"), b"keep").unwrap();
        std::fs::create_dir_all(dir.path().join("cache/v1")).unwrap();

        let outcomes = cleaner(dir.path()).purge().await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(CleanupOutcome::succeeded));
        assert!(!dir.path().join("auth/session/SingletonLock").exists());
        assert!(!profile.join("SingletonSocket").exists());
        assert!(profile.join("Cookies").exists());
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn nothing_to_purge_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cleaner(dir.path()).purge().await.is_empty());
    }
}
