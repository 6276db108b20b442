use crate::{
    request::{Command, Request},
    response::Response,
    text::TextBlock,
};
use anyhow::{Context as _, Result};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
};

/// one-shot client for a single peer
///
/// every call opens a fresh connection, writes one framed request, reads the
/// response until the peer closes and returns it. This is the outbound half
/// of the protocol: the federation pull sync, the push hints and the
/// administrative handshake all go through here.
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
}

impl Client {
    /// address may be a bare hostname or an explicit `host:port`; the bare
    /// form uses the given default port
    ///
    /// a host part that still contains `:` is an IPv6 literal, not a port
    /// separator
    pub fn new(address: impl AsRef<str>, default_port: u16) -> Self {
        let address = address.as_ref();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => Self {
                    host: host.to_owned(),
                    port,
                },
                Err(_) => Self {
                    host: address.to_owned(),
                    port: default_port,
                },
            },
            _ => Self {
                host: address.to_owned(),
                port: default_port,
            },
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// send the given command with a structured text body
    pub async fn send(&self, command: Command, body: &TextBlock) -> Result<Response> {
        let request = Request::new(self.host.clone(), command, body.to_string().into_bytes());
        self.send_request(&request).await
    }

    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        tracing::debug!(peer = %self.host, command = %request.command, "sending request");

        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("cannot connect to peer {}:{}", self.host, self.port))?;

        stream
            .write_all(&request.to_bytes())
            .await
            .with_context(|| format!("cannot send {} request to {}", request.command, self.host))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .with_context(|| format!("cannot read {} response from {}", request.command, self.host))?;

        Response::from_bytes(&raw)
            .with_context(|| format!("invalid {} response from {}", request.command, self.host))
    }
}
