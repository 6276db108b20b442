//! end to end exercises of a node over real TCP connections

use twinmail_proto as proto;
use twinmail_storage::MailId;
use twinmaild::{
    auth::Auth,
    federation::{self, Federation},
    server::{self, Node, Server},
    storage::{self, Storage},
};

struct TestNode {
    _dir: tempfile::TempDir,
    storage: Storage,
    server: Server,
    federation: Federation,
}

impl TestNode {
    async fn start(hostname: &str) -> Self {
        Self::start_with(hostname, |_| ()).await
    }

    async fn start_with(hostname: &str, tweak: impl FnOnce(&mut server::Config)) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");

        let storage_config = storage::Config {
            store_path: dir.path().join("store.json"),
            archive_dir: dir.path().join("mail"),
        };
        let storage = Storage::new(&storage_config).await.expect("open storage");

        let mut server_config = server::Config {
            listen_address: "127.0.0.1:0".parse().expect("listen address"),
            hostname: hostname.to_owned(),
            ..server::Config::default()
        };
        tweak(&mut server_config);

        let federation_config = federation::Config::default();
        let (federation, federation_handle) = Federation::new(
            storage.clone(),
            hostname.to_owned(),
            federation_config,
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

    fn client(&self) -> proto::Client {
        let address = format!("127.0.0.1:{}", self.server.local_address().port());
        proto::Client::new(address, proto::DEFAULT_PORT)
    }

    async fn register(&self, username: &str, password: &str) {
        let hash = twinmaild::auth::hash_password(password).expect("hash password");
        self.storage
            .store()
            .create_user(username, &hash)
            .await
            .expect("create user");
    }

    async fn stop(self) {
        self.server.shutdown().await.expect("stop server");
        self.federation.shutdown().await.expect("stop federation");
    }
}

fn block(pairs: &[(&str, &str)]) -> proto::TextBlock {
    let mut block = proto::TextBlock::new();
    for (key, value) in pairs {
        block.set(*key, *value);
    }
    block
}

fn token_of(response: &proto::Response) -> String {
    assert!(response.status.is_success(), "login failed: {:?}", response);
    let body: proto::TextBlock = response.body.parse().expect("parse login response");
    body.get("token").expect("token in response").to_owned()
}

#[tokio::test]
async fn token_lifecycle() {
    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    let client = node.client();

    // wrong password is an authorization failure, not an absent resource
    let refused = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "wrong")]),
        )
        .await
        .expect("send login");
    assert_eq!(refused.status, proto::Status::Unauthorized);

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let inbox = client
        .send(proto::Command::Inbox, &block(&[("token", &token)]))
        .await
        .expect("send inbox");
    assert_eq!(inbox.status, proto::Status::Success);

    let logout = client
        .send(proto::Command::Logout, &block(&[("token", &token)]))
        .await
        .expect("send logout");
    assert_eq!(logout.status, proto::Status::Success);

    // the token died with the logout
    let refused = client
        .send(proto::Command::Inbox, &block(&[("token", &token)]))
        .await
        .expect("send inbox");
    assert_eq!(refused.status, proto::Status::Unauthorized);

    node.stop().await;
}

#[tokio::test]
async fn unknown_user_login_is_not_found() {
    let node = TestNode::start("local.test").await;
    let client = node.client();

    let response = client
        .send(
            proto::Command::Token,
            &block(&[("username", "nobody"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    assert_eq!(response.status, proto::Status::NotFound);

    node.stop().await;
}

#[tokio::test]
async fn local_post_lands_in_the_recipient_inbox() {
    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    node.register("bob", "secret2").await;
    let client = node.client();

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let mut post = block(&[("token", &token), ("server", "local.test")]);
    post.set_in_section("body", "recipient", "bob@local.test");
    post.set_in_section("body", "content", "hello bob");

    let posted = client
        .send(proto::Command::Post, &post)
        .await
        .expect("send post");
    assert_eq!(posted.status, proto::Status::Success);

    // straight into bob's inbox, never through an outbox
    let inbox = node.storage.store().inbox("bob").await;
    assert_eq!(inbox.len(), 1);
    assert!(node.storage.store().outbox("local.test").await.is_empty());

    let body = node
        .storage
        .archive()
        .read(inbox[0])
        .await
        .expect("archived body");
    assert!(String::from_utf8_lossy(&body).contains("hello bob"));

    node.stop().await;
}

#[tokio::test]
async fn post_without_recipient_delivers_nothing() {
    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    let client = node.client();

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let mut post = block(&[("token", &token), ("server", "local.test")]);
    post.set_in_section("body", "content", "to whom it may concern");

    let response = client
        .send(proto::Command::Post, &post)
        .await
        .expect("send post");
    assert_eq!(response.status, proto::Status::BadRequest);
    assert!(node.storage.store().inbox("alice").await.is_empty());

    node.stop().await;
}

#[tokio::test]
async fn remote_post_queues_in_the_outbox() {
    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    let client = node.client();

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let mut post = block(&[("token", &token), ("server", "remote.test")]);
    post.set_in_section("body", "recipient", "carol@remote.test");

    let posted = client
        .send(proto::Command::Post, &post)
        .await
        .expect("send post");
    assert_eq!(posted.status, proto::Status::Success);

    let outbox = node.storage.store().outbox("remote.test").await;
    assert_eq!(outbox.len(), 1);

    // the queue is readable over the wire without any credentials
    let listing = client
        .send(proto::Command::Outbox, &block(&[("host", "remote.test")]))
        .await
        .expect("send outbox");
    assert_eq!(listing.status, proto::Status::Success);
    let listing: proto::TextBlock = listing.body.parse().expect("parse listing");
    assert_eq!(listing.items(), [outbox[0].to_string()]);

    node.stop().await;
}

#[tokio::test]
async fn first_queued_mail_sends_a_push_hint() {
    use futures::{sink::SinkExt as _, stream::StreamExt as _};
    use tokio_util::codec::Framed;

    // stand-in destination node waiting for the hint
    let destination = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind destination");
    let destination_address = destination.local_addr().expect("destination address");

    let hint = tokio::spawn(async move {
        let (stream, _) = destination.accept().await.expect("accept");
        let mut framed = Framed::new(stream, proto::RequestCodec::new());
        let frame = framed.next().await.expect("one frame").expect("valid frame");
        framed
            .send(proto::Response::empty())
            .await
            .expect("answer the hint");
        frame
    });

    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    let client = node.client();

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    // queue length 1 is the first batch boundary
    let mut post = block(&[
        ("token", &token),
        ("server", &destination_address.to_string()),
    ]);
    post.set_in_section("body", "recipient", "carol@far.test");
    let posted = client
        .send(proto::Command::Post, &post)
        .await
        .expect("send post");
    assert_eq!(posted.status, proto::Status::Success);

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), hint)
        .await
        .expect("hint within the timeout")
        .expect("destination task");
    match frame {
        proto::Frame::Request(request) => {
            assert_eq!(request.command, proto::Command::CallMe);
            let body: proto::TextBlock = std::str::from_utf8(&request.body)
                .expect("utf-8 hint body")
                .parse()
                .expect("parse hint body");
            assert_eq!(body.get("host"), Some("local.test"));
        }
        proto::Frame::Foreign(_) => panic!("expected a callme request"),
    }

    node.stop().await;
}

#[tokio::test]
async fn delete_succeeds_once_then_reports_absent() {
    let node = TestNode::start("local.test").await;
    node.register("bob", "secret2").await;
    let client = node.client();

    let id = MailId::generate();
    node.storage
        .deliver_local("bob", id, b"recipient=bob@local.test\n")
        .await
        .expect("deliver");

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "bob"), ("password", "secret2")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let id = id.to_string();
    let first = client
        .send(
            proto::Command::Delete,
            &block(&[("token", &token), ("id", &id)]),
        )
        .await
        .expect("send delete");
    assert_eq!(first.status, proto::Status::Success);

    let second = client
        .send(
            proto::Command::Delete,
            &block(&[("token", &token), ("id", &id)]),
        )
        .await
        .expect("send delete");
    assert_eq!(second.status, proto::Status::NotFound);

    node.stop().await;
}

#[tokio::test]
async fn traversal_ids_are_just_not_found() {
    let node = TestNode::start("local.test").await;
    let client = node.client();

    let response = client
        .send(
            proto::Command::Get,
            &block(&[("id", "../../etc/passwd")]),
        )
        .await
        .expect("send get");
    assert_eq!(response.status, proto::Status::NotFound);

    node.stop().await;
}

#[tokio::test]
async fn info_needs_no_credentials() {
    let node = TestNode::start("local.test").await;
    let client = node.client();

    let response = client
        .send(proto::Command::Info, &proto::TextBlock::new())
        .await
        .expect("send info");
    assert_eq!(response.status, proto::Status::Success);

    let body: proto::TextBlock = response.body.parse().expect("parse info");
    assert!(body.get("name").is_some());
    assert!(body.get("desc").is_some());

    node.stop().await;
}

#[tokio::test]
async fn keys_roundtrip_through_setkeys() {
    let node = TestNode::start("local.test").await;
    node.register("alice", "secret1").await;
    let client = node.client();

    // no keys registered yet
    let missing = client
        .send(proto::Command::Keys, &proto::TextBlock::new())
        .await;
    // the KEYS body is the bare username, an empty block serializes to
    // nothing and the request is rejected
    assert_eq!(
        missing.expect("send keys").status,
        proto::Status::BadRequest
    );

    let granted = client
        .send(
            proto::Command::Token,
            &block(&[("username", "alice"), ("password", "secret1")]),
        )
        .await
        .expect("send login");
    let token = token_of(&granted);

    let mut set = block(&[("token", &token)]);
    set.set_in_section("keys", "enc", "enc-public-key");
    set.set_in_section("keys", "sign", "sign-public-key");
    let stored = client
        .send(proto::Command::SetKeys, &set)
        .await
        .expect("send setkeys");
    assert_eq!(stored.status, proto::Status::Success);

    let request = proto::Request::new(
        client.host().to_owned(),
        proto::Command::Keys,
        "alice".as_bytes().to_vec(),
    );
    let response = client.send_request(&request).await.expect("send keys");
    assert_eq!(response.status, proto::Status::Success);
    let body: proto::TextBlock = response.body.parse().expect("parse keys");
    assert_eq!(body.get("enc"), Some("enc-public-key"));
    assert_eq!(body.get("sign"), Some("sign-public-key"));

    node.stop().await;
}

#[tokio::test]
async fn callme_and_deleteme_manage_the_ring() {
    let node = TestNode::start("local.test").await;
    let client = node.client();

    let joined = client
        .send(proto::Command::CallMe, &block(&[("host", "peer.test")]))
        .await
        .expect("send callme");
    assert_eq!(joined.status, proto::Status::Success);

    // a second greeting does not duplicate the entry
    client
        .send(proto::Command::CallMe, &block(&[("host", "peer.test")]))
        .await
        .expect("send callme");
    assert_eq!(node.storage.store().ring().await, ["peer.test"]);

    let left = client
        .send(proto::Command::DeleteMe, &block(&[("host", "peer.test")]))
        .await
        .expect("send deleteme");
    assert_eq!(left.status, proto::Status::Success);
    assert!(node.storage.store().ring().await.is_empty());

    node.stop().await;
}

#[tokio::test]
async fn foreign_schemes_are_rejected_by_default() {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    let node = TestNode::start("local.test").await;
    let address = node.server.local_address();

    let mut stream = tokio::net::TcpStream::connect(address)
        .await
        .expect("connect");
    stream
        .write_all(b"gemini://example.com/\r\n")
        .await
        .expect("write request");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    assert!(response.starts_with(b"59"));

    node.stop().await;
}

#[tokio::test]
async fn foreign_schemes_are_relayed_when_forwarding() {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    // stand-in for the secondary service behind the node
    let upstream = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let upstream_address = upstream.local_addr().expect("upstream address");

    let served = tokio::spawn(async move {
        let (mut stream, _) = upstream.accept().await.expect("accept");
        let mut request = vec![0u8; 23];
        stream.read_exact(&mut request).await.expect("read request");
        stream
            .write_all(b"20 text/gemini\r\nhello\r\n")
            .await
            .expect("write response");
        request
    });

    let node = TestNode::start_with("local.test", |config| {
        config.forward_requests = true;
        config.forward_address = upstream_address;
    })
    .await;

    let mut stream = tokio::net::TcpStream::connect(node.server.local_address())
        .await
        .expect("connect");
    stream
        .write_all(b"gemini://example.com/\r\n")
        .await
        .expect("write request");
    stream.shutdown().await.expect("shutdown write half");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    assert_eq!(response, b"20 text/gemini\r\nhello\r\n");

    let relayed = served.await.expect("upstream task");
    assert_eq!(relayed, b"gemini://example.com/\r\n");

    node.stop().await;
}
