use anyhow::{Context as _, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::{
    io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt as _},
    net::TcpStream,
};

/// relay a foreign scheme request to the secondary endpoint
///
/// `buffered` holds every byte already read from the client; it is replayed
/// to the forward endpoint before the two streams are spliced together. The
/// relay is transparent: both sides close whenever they please.
pub(crate) async fn relay<S>(
    mut client: S,
    buffered: Bytes,
    forward_address: SocketAddr,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut upstream = TcpStream::connect(forward_address)
        .await
        .with_context(|| format!("cannot reach the forward endpoint {}", forward_address))?;

    upstream
        .write_all(&buffered)
        .await
        .context("cannot replay the buffered request to the forward endpoint")?;

    copy_bidirectional(&mut client, &mut upstream)
        .await
        .context("relay interrupted")?;

    Ok(())
}
