/*!
# federation sync engine

Background task pulling pending mail from the peer ring. Every tick the
engine asks each ring member for the outbox queued under this node's
hostname, then fetches every id it has not archived yet. Already archived
ids are skipped, which is the idempotence guard making repeated syncs and
retries safe.

The engine is also the sender of push hints: best-effort `CALLME` requests
fired at a destination once its outbox has grown by a batch, asking it to
poll sooner than its next scheduled tick. Hints carry no delivery guarantee
and are never retried.

Failures are contained per peer and per mail: one unreachable or misbehaving
peer neither aborts the tick nor surfaces to any connected client.
*/

mod config;

pub use self::config::Config;
use crate::storage::Storage;
use anyhow::{anyhow, bail, Result};
use tokio::{sync::mpsc, task::JoinHandle, time};
use twinmail_proto as proto;
use twinmail_storage::MailId;

pub struct Federation {
    command: mpsc::Sender<Command>,
    handle: JoinHandle<Result<()>>,
}

/// cheap clone handed to the command dispatcher
#[derive(Clone)]
pub struct Handle {
    command: mpsc::Sender<Command>,
    push_hint_batch: usize,
}

enum Command {
    Shutdown,
    SyncNow(String),
    PushHint(String),
}

struct Runner {
    storage: Storage,
    hostname: String,
    config: Config,
    command: mpsc::Receiver<Command>,
}

impl Federation {
    pub fn new(storage: Storage, hostname: String, config: Config) -> (Self, Handle) {
        let (command_sender, command_receiver) = mpsc::channel(16);

        let handle = Handle {
            command: command_sender.clone(),
            push_hint_batch: config.push_hint_batch.max(1),
        };

        let runner = Runner {
            storage,
            hostname,
            config,
            command: command_receiver,
        };

        let task = tokio::spawn(async move {
            let mut runner = runner;
            runner.run().await
        });

        (
            Self {
                command: command_sender,
                handle: task,
            },
            handle,
        )
    }

    pub async fn shutdown(self) -> Result<()> {
        self.command
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow!("Cannot send shutdown command to the federation engine"))?;

        let mut handle = self.handle;

        tokio::select! {
            result = &mut handle => {
                match result {
                    Ok(result) => result,
                    Err(error) => bail!("error while waiting for the federation engine to shutdown: {}", error)
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                handle.abort();
                bail!("shutdown timedout, aborting instead...")
            }
        }
    }
}

impl Handle {
    /// ask the engine to pull from the given peer ahead of the next tick
    ///
    /// the pull itself runs asynchronously; the caller can answer its client
    /// right away
    pub async fn sync_now(&self, host: impl Into<String>) {
        if self
            .command
            .send(Command::SyncNow(host.into()))
            .await
            .is_err()
        {
            tracing::warn!("federation engine is gone, ignoring the sync request");
        }
    }

    /// fire a best-effort push hint at the destination
    pub async fn push_hint(&self, host: impl Into<String>) {
        if self
            .command
            .send(Command::PushHint(host.into()))
            .await
            .is_err()
        {
            tracing::warn!("federation engine is gone, dropping the push hint");
        }
    }

    /// true when the outbox just crossed a batch boundary and the
    /// destination deserves a hint
    pub fn hint_due(&self, queued: usize) -> bool {
        queued > 0 && (queued - 1) % self.push_hint_batch == 0
    }
}

impl Runner {
    #[tracing::instrument(skip(self), fields(hostname = %self.hostname), level = "info")]
    async fn run(&mut self) -> Result<()> {
        let mut tick = time::interval(self.config.sync_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sync_all().await
                }
                command = self.command.recv() => match command {
                    None => bail!("failed to receive anymore commands"),
                    Some(Command::Shutdown) => break,
                    Some(Command::SyncNow(host)) => {
                        // bounded like the scheduled ticks: a stalled peer
                        // must not wedge the command loop
                        match time::timeout(self.config.peer_timeout, self.sync_peer(&host)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => {
                                tracing::warn!(reason = %error, peer = %host, "requested sync failed")
                            }
                            Err(_) => {
                                tracing::warn!(peer = %host, "requested sync timed out")
                            }
                        }
                    }
                    Some(Command::PushHint(host)) => self.send_push_hint(&host).await,
                },
            }
        }

        Ok(())
    }

    async fn sync_all(&self) {
        let ring = self.storage.store().ring().await;
        tracing::debug!(peers = ring.len(), "federation tick");

        for host in ring {
            match time::timeout(self.config.peer_timeout, self.sync_peer(&host)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(reason = %error, peer = %host, "peer sync failed")
                }
                Err(_) => {
                    tracing::warn!(peer = %host, "peer sync timed out, abandoned for this tick")
                }
            }
        }
    }

    async fn sync_peer(&self, host: &str) -> Result<()> {
        pull_once(&self.storage, &self.hostname, &self.config, host).await
    }

    async fn send_push_hint(&self, host: &str) {
        let client = proto::Client::new(host, self.config.peer_port);
        let mut body = proto::TextBlock::new();
        body.set("host", self.hostname.clone());

        let hint = client.send(proto::Command::CallMe, &body);
        match time::timeout(self.config.peer_timeout, hint).await {
            Ok(Ok(_)) => tracing::debug!(peer = %host, "push hint delivered"),
            Ok(Err(error)) => tracing::debug!(reason = %error, peer = %host, "push hint failed"),
            Err(_) => tracing::debug!(peer = %host, "push hint timed out"),
        }
    }
}

/// one pull sync exchange against a single peer
///
/// lists the peer's outbox queued under `hostname`, then fetches every body
/// not already present in the local archive, delivering each into the
/// recipient's inbox. Mail without a `recipient` field is undeliverable and
/// dropped silently. No acknowledgment is sent back: the peer's outbox is
/// the peer's own bookkeeping.
pub async fn pull_once(storage: &Storage, hostname: &str, config: &Config, peer: &str) -> Result<()> {
    let client = proto::Client::new(peer, config.peer_port);

    let mut body = proto::TextBlock::new();
    body.set("host", hostname);
    let response = client.send(proto::Command::Outbox, &body).await?;
    if !response.status.is_success() {
        bail!(
            "peer {} answered the outbox request with status {}",
            peer,
            response.status
        );
    }

    let listing: proto::TextBlock = response
        .body
        .parse()
        .map_err(|error| anyhow!("peer {} sent an invalid outbox listing: {}", peer, error))?;

    for item in listing.items() {
        let id: MailId = match item.parse() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(peer = %peer, id = %item, "skipping invalid id in the outbox listing");
                continue;
            }
        };

        if storage.archive().contains(id).await {
            // fetched on a previous tick
            continue;
        }

        if let Err(error) = fetch_one(storage, &client, id).await {
            tracing::warn!(reason = %error, peer = %peer, id = %id, "failed to fetch mail");
        }
    }

    Ok(())
}

async fn fetch_one(storage: &Storage, client: &proto::Client, id: MailId) -> Result<()> {
    let mut body = proto::TextBlock::new();
    body.set("id", id.to_string());

    let response = client.send(proto::Command::Get, &body).await?;
    if !response.status.is_success() {
        bail!("peer answered the fetch with status {}", response.status);
    }

    let envelope: proto::Envelope = response
        .body
        .parse()
        .map_err(|error| anyhow!("invalid mail envelope: {}", error))?;

    let recipient = match envelope.local_user() {
        Some(user) => user.to_owned(),
        None => {
            tracing::debug!(id = %id, "dropping undeliverable mail without recipient");
            return Ok(());
        }
    };

    tracing::info!(id = %id, recipient = %recipient, "fetched mail from peer");
    storage
        .deliver_local(&recipient, id, response.body.as_bytes())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(push_hint_batch: usize) -> Handle {
        let (command, _) = mpsc::channel(1);
        Handle {
            command,
            push_hint_batch,
        }
    }

    #[test]
    fn hints_fire_on_batch_boundaries() {
        let handle = handle(5);
        let due: Vec<usize> = (0..=12).filter(|queued| handle.hint_due(*queued)).collect();
        assert_eq!(due, [1, 6, 11]);
    }

    #[test]
    fn empty_queue_never_deserves_a_hint() {
        assert!(!handle(1).hint_due(0));
        assert!(handle(1).hint_due(1));
    }
}
