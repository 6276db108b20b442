//! pull sync exchanges between two nodes

use twinmail_proto as proto;
use twinmail_storage::MailId;
use twinmaild::{
    auth::Auth,
    federation::{self, Federation},
    server::{self, Node, Server},
    storage::{self, Storage},
};

struct PeerNode {
    _dir: tempfile::TempDir,
    storage: Storage,
    server: Server,
    federation: Federation,
}

impl PeerNode {
    /// a running node whose outbox we will pull from
    async fn start(hostname: &str) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");

        let storage_config = storage::Config {
            store_path: dir.path().join("store.json"),
            archive_dir: dir.path().join("mail"),
        };
        let storage = Storage::new(&storage_config).await.expect("open storage");

        let server_config = server::Config {
            listen_address: "127.0.0.1:0".parse().expect("listen address"),
            hostname: hostname.to_owned(),
            ..server::Config::default()
        };
        let (federation, federation_handle) = Federation::new(
            storage.clone(),
            hostname.to_owned(),
            federation::Config::default(),
        );
        let auth = Auth::new(storage.store().clone());
        let server = Server::new(Node {
            config: server_config,
            storage: storage.clone(),
            auth,
            federation: federation_handle,
        })
        .await
        .expect("start server");

        Self {
            _dir: dir,
            storage,
            server,
            federation,
        }
    }

    fn address(&self) -> String {
        format!("127.0.0.1:{}", self.server.local_address().port())
    }

    async fn stop(self) {
        self.server.shutdown().await.expect("stop server");
        self.federation.shutdown().await.expect("stop federation");
    }
}

async fn local_storage() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::tempdir().expect("temporary directory");
    let config = storage::Config {
        store_path: dir.path().join("store.json"),
        archive_dir: dir.path().join("mail"),
    };
    let storage = Storage::new(&config).await.expect("open storage");
    (dir, storage)
}

#[tokio::test]
async fn pull_delivers_queued_mail() {
    let peer = PeerNode::start("remote.test").await;

    let id = MailId::generate();
    let body = b"recipient=bob@local.test\ncontent=hello from afar\n";
    peer.storage
        .queue_remote("local.test", id, body)
        .await
        .expect("queue mail");

    let (_dir, local) = local_storage().await;
    let config = federation::Config::default();

    federation::pull_once(&local, "local.test", &config, &peer.address())
        .await
        .expect("pull");

    assert_eq!(local.store().inbox("bob").await, [id]);
    let archived = local.archive().read(id).await.expect("archived body");
    assert_eq!(archived, body);

    peer.stop().await;
}

#[tokio::test]
async fn pulling_twice_delivers_once() {
    let peer = PeerNode::start("remote.test").await;

    let id = MailId::generate();
    peer.storage
        .queue_remote("local.test", id, b"recipient=bob@local.test\n")
        .await
        .expect("queue mail");

    let (_dir, local) = local_storage().await;
    let config = federation::Config::default();

    federation::pull_once(&local, "local.test", &config, &peer.address())
        .await
        .expect("first pull");
    federation::pull_once(&local, "local.test", &config, &peer.address())
        .await
        .expect("second pull");

    // the archive existence check keeps the second pull from duplicating
    assert_eq!(local.store().inbox("bob").await, [id]);

    peer.stop().await;
}

#[tokio::test]
async fn undeliverable_mail_is_dropped() {
    let peer = PeerNode::start("remote.test").await;

    let id = MailId::generate();
    peer.storage
        .queue_remote("local.test", id, b"content=who is this for\n")
        .await
        .expect("queue mail");

    let (_dir, local) = local_storage().await;
    let config = federation::Config::default();

    federation::pull_once(&local, "local.test", &config, &peer.address())
        .await
        .expect("pull");

    // no recipient, nothing delivered, nothing archived
    assert!(!local.archive().contains(id).await);

    peer.stop().await;
}

#[tokio::test]
async fn mail_for_another_node_is_left_alone() {
    let peer = PeerNode::start("remote.test").await;

    let id = MailId::generate();
    peer.storage
        .queue_remote("elsewhere.test", id, b"recipient=carol@elsewhere.test\n")
        .await
        .expect("queue mail");

    let (_dir, local) = local_storage().await;
    let config = federation::Config::default();

    federation::pull_once(&local, "local.test", &config, &peer.address())
        .await
        .expect("pull");

    assert!(!local.archive().contains(id).await);
    assert!(local.store().inbox("carol").await.is_empty());

    peer.stop().await;
}

#[tokio::test]
async fn stalled_peer_does_not_wedge_the_engine() {
    use std::time::Duration;

    // a peer that accepts connections and then never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind peer");
    let peer_address = listener.local_addr().expect("peer address").to_string();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.expect("accept");
            held.push(stream);
        }
    });

    let (_dir, storage) = local_storage().await;
    let config = federation::Config {
        peer_timeout: Duration::from_millis(100),
        ..federation::Config::default()
    };
    let (federation, handle) = Federation::new(storage, "local.test".to_owned(), config);

    handle.sync_now(peer_address).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // the requested sync timed out instead of holding the command loop
    federation.shutdown().await.expect("engine still responsive");
    holder.abort();
}

#[tokio::test]
async fn new_command_triggers_an_early_pull() {
    // the peer queues mail for us, then we greet it with NEW and wait for
    // the engine to pull ahead of its next scheduled tick
    let peer = PeerNode::start("remote.test").await;

    let id = MailId::generate();
    peer.storage
        .queue_remote("local.test", id, b"recipient=bob@local.test\n")
        .await
        .expect("queue mail");

    let local = PeerNode::start("local.test").await;
    local
        .storage
        .store()
        .ring_add(&peer.address())
        .await
        .expect("add peer");

    let client = proto::Client::new(local.address(), proto::DEFAULT_PORT);
    let mut body = proto::TextBlock::new();
    body.set("host", peer.address());
    let response = client
        .send(proto::Command::New, &body)
        .await
        .expect("send new");
    assert_eq!(response.status, proto::Status::Success);

    // the pull runs asynchronously in the federation engine
    let mut delivered = false;
    for _ in 0..50 {
        if local.storage.store().inbox("bob").await == [id] {
            delivered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(delivered, "mail never arrived through the early pull");

    local.stop().await;
    peer.stop().await;
}
