/*!
# connection handling

One request, one response, one connection. The listener accepts inbound
TCP streams and hands each one to its own task; the task decodes at most
one framed request, dispatches it, writes the response and lets the
connection drop.

Requests carrying a foreign scheme are either relayed verbatim to the
configured forward address or rejected, depending on the node
configuration.
*/

mod config;
mod dispatch;
mod forward;

pub use self::config::Config;
use crate::{auth::Auth, federation, storage::Storage};
use anyhow::{anyhow, bail, Context as _, Result};
use futures::{sink::SinkExt as _, stream::StreamExt as _};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::codec::Framed;
use twinmail_proto::{CodecError, Frame, RequestCodec, Response};

/// everything a command handler may need, cloned into each connection task
#[derive(Clone)]
pub struct Node {
    pub config: Config,
    pub storage: Storage,
    pub auth: Auth,
    pub federation: federation::Handle,
}

pub struct Server {
    local_address: SocketAddr,
    command: mpsc::Sender<Command>,
    handle: JoinHandle<Result<()>>,
}

enum Command {
    Shutdown,
}

struct Runner {
    node: Node,
    listener: TcpListener,
    command: mpsc::Receiver<Command>,
}

impl Server {
    /// bind the listen address and start accepting connections
    pub async fn new(node: Node) -> Result<Self> {
        let listener = TcpListener::bind(node.config.listen_address)
            .await
            .with_context(|| format!("cannot listen on {}", node.config.listen_address))?;
        let local_address = listener
            .local_addr()
            .context("cannot query the bound listen address")?;

        tracing::info!(address = %local_address, "accepting inbound connections");

        let (command_sender, command_receiver) = mpsc::channel(8);
        let runner = Runner {
            node,
            listener,
            command: command_receiver,
        };

        let handle = tokio::spawn(async move {
            let mut runner = runner;
            runner.run().await
        });

        Ok(Self {
            local_address,
            command: command_sender,
            handle,
        })
    }

    /// the actual bound address; differs from the configured one when the
    /// configuration asked for port 0
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub async fn shutdown(self) -> Result<()> {
        self.command
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow!("Cannot send shutdown command to the server"))?;

        let mut handle = self.handle;

        tokio::select! {
            result = &mut handle => {
                match result {
                    Ok(result) => result,
                    Err(error) => bail!("error while waiting for the server to shutdown: {}", error)
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                handle.abort();
                bail!("shutdown timedout, aborting instead...")
            }
        }
    }
}

impl Runner {
    async fn run(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                command = self.command.recv() => match command {
                    None => bail!("failed to receive anymore commands"),
                    Some(Command::Shutdown) => break,
                },
                accepted = self.listener.accept() => {
                    let (stream, peer_address) = accepted.context("cannot accept inbound connection")?;
                    let node = self.node.clone();

                    tokio::spawn(async move {
                        if let Err(error) = serve_connection(node, stream).await {
                            tracing::warn!(
                                reason = %error,
                                peer = %peer_address,
                                "failed to serve connection"
                            );
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

// generic over the stream so a TLS terminator can wrap the TCP stream
// before it lands here
async fn serve_connection<S>(node: Node, stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, RequestCodec::new());

    let frame = match framed.next().await {
        // client went away before completing a request
        None => return Ok(()),
        Some(Err(CodecError::Header(error))) => {
            tracing::debug!(reason = %error, "rejecting malformed request");
            framed
                .send(Response::bad_request())
                .await
                .context("cannot send the rejection")?;
            return Ok(());
        }
        Some(Err(CodecError::Io(error))) => {
            return Err(error).context("cannot read the request");
        }
        Some(Ok(frame)) => frame,
    };

    match frame {
        Frame::Request(request) => {
            let response = dispatch::dispatch(request, &node).await;
            framed
                .send(response)
                .await
                .context("cannot send the response")
        }
        Frame::Foreign(buffered) => {
            if node.config.forward_requests {
                forward::relay(framed.into_inner(), buffered, node.config.forward_address).await
            } else {
                framed
                    .send(Response::bad_request())
                    .await
                    .context("cannot send the rejection")
            }
        }
    }
}
