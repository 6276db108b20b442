mod config;

pub use self::config::Config;
use anyhow::Result;
use twinmail_storage::{Archive, MailId, Store};

/// the persistent half of the node: the flat store plus the mail archive
///
/// the two delivery operations live here because they touch both halves:
/// a body must be durable in the archive before any list references it.
#[derive(Clone)]
pub struct Storage {
    store: Store,
    archive: Archive,
}

impl Storage {
    pub async fn new(config: &Config) -> Result<Self> {
        let store = Store::open(&config.store_path).await?;
        let archive = Archive::open(&config.archive_dir).await?;

        Ok(Self { store, archive })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// archive the body, then reference it from the local user's inbox
    ///
    /// if the reference cannot be written the body is removed again: an
    /// unreferenced archived id would be skipped by the sync existence
    /// check forever instead of being fetched again
    pub async fn deliver_local(&self, username: &str, id: MailId, body: &[u8]) -> Result<()> {
        self.archive.store(id, body).await?;
        if let Err(error) = self.store.inbox_push(username, id).await {
            self.archive.remove(id).await;
            return Err(error);
        }
        Ok(())
    }

    /// archive the body and queue it for the remote host
    ///
    /// returns the outbox length after queueing, which drives the push hint
    /// batching
    pub async fn queue_remote(&self, host: &str, id: MailId, body: &[u8]) -> Result<usize> {
        self.archive.store(id, body).await?;
        self.store.outbox_push(host, id).await
    }
}
