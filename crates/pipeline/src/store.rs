use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, warn};

/// Flat directory of artifacts pending upload and deferred deletion.
///
/// The worker writes files here; the pipeline reads them once and schedules
/// their removal. Deletion is best-effort: a missing file is a no-op and a
/// failed removal is logged, never propagated.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the store directory if absent. Called once at startup.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Path for `filename`, confined to the store directory. Only the final
    /// path component is honored; the worker controls the name.
    fn entry(&self, filename: &str) -> PathBuf {
        match Path::new(filename).file_name() {
            Some(name) => self.dir.join(name),
            None => self.dir.join("artifact"),
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        tokio::fs::try_exists(self.entry(filename))
            .await
            .unwrap_or(false)
    }

    pub async fn read(&self, filename: &str) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.entry(filename)).await
    }

    /// Remove `filename` after `delay`, on a detached task.
    pub fn schedule_delete(&self, filename: &str, delay: Duration) {
        let path = self.entry(filename);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::fs::try_exists(&path).await {
                Ok(true) => match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed consumed artifact"),
                    // Lost a race with another cleanup; nothing to do.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to remove artifact");
                    },
                },
                Ok(false) => {},
                Err(e) => warn!(path = %path.display(), error = %e, "failed to stat artifact"),
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_round_trips_what_the_worker_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        std::fs::write(dir.path().join("app.apk"), b"bytes").unwrap();
        assert!(store.exists("app.apk").await);
        assert_eq!(store.read("app.apk").await.unwrap(), b"bytes");
        assert!(!store.exists("missing.apk").await);
    }

    #[tokio::test]
    async fn entry_is_confined_to_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        std::fs::write(dir.path().join("app.apk"), b"bytes").unwrap();
        assert!(store.exists("../../app.apk").await);
        assert_eq!(store.read("sub/dir/app.apk").await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn scheduled_delete_removes_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        let path = dir.path().join("app.apk");
        std::fs::write(&path, b"bytes").unwrap();

        store.schedule_delete("app.apk", Duration::from_millis(50));
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn delete_of_missing_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        // Both schedules race for the same file; the loser must not error.
        store.schedule_delete("gone.apk", Duration::from_millis(10));
        store.schedule_delete("gone.apk", Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
