use crate::MailId;
use anyhow::{Context as _, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// the immutable, id-addressed archive of mail bodies
///
/// one file per mail, named after its [`MailId`]. Bodies are written once
/// and never modified; their lifecycle ends only when the owning user
/// deletes the mail from their inbox. Read failures of any kind are treated
/// as resource absent, never surfaced as fatal errors.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: Arc<PathBuf>,
}

impl Archive {
    /// open the archive directory, creating it if absent
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create the mail archive directory: {}", dir.display()))?;
        Ok(Self { dir: Arc::new(dir) })
    }

    // the id is already constrained to hex, so the joined path can never
    // escape the archive directory
    fn path_of(&self, id: MailId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    pub async fn store(&self, id: MailId, body: &[u8]) -> Result<()> {
        tokio::fs::write(self.path_of(id), body)
            .await
            .with_context(|| format!("cannot archive mail {}", id))
    }

    pub async fn read(&self, id: MailId) -> Option<Vec<u8>> {
        tokio::fs::read(self.path_of(id)).await.ok()
    }

    pub async fn contains(&self, id: MailId) -> bool {
        tokio::fs::metadata(self.path_of(id)).await.is_ok()
    }

    pub async fn remove(&self, id: MailId) -> bool {
        tokio::fs::remove_file(self.path_of(id)).await.is_ok()
    }
}
