// gateway/src/irc/transport.rs
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};

use common::UpstreamTarget;

use super::tls;
use crate::admission::is_private_ip;
use crate::error::UpstreamError;

/// Byte stream to an IRC server, plain TCP or TLS
pub trait IrcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcStream for T {}

pub type BoxedStream = Box<dyn IrcStream>;

/// Open the socket described by `target`, wrapping it in TLS when requested.
///
/// With `block_private` set, every resolved address is vetted before any is
/// dialled, so names and numeric forms that resolve into private ranges are
/// refused here even if they slipped past admission.
pub async fn establish(target: UpstreamTarget, block_private: bool) -> Result<BoxedStream, UpstreamError> {
    let addrs = resolve(&target, block_private).await?;
    let tcp = connect_any(&addrs).await?;
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", target, e);
    }

    if !target.tls {
        return Ok(Box::new(tcp));
    }

    let stream = tls::connect(&target.host, tcp).await?;
    Ok(Box::new(stream))
}

async fn resolve(target: &UpstreamTarget, block_private: bool) -> Result<Vec<SocketAddr>, UpstreamError> {
    let addrs: Vec<SocketAddr> = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(UpstreamError::Connect)?
        .collect();

    if block_private {
        if let Some(addr) = addrs.iter().find(|addr| is_private_ip(addr.ip())) {
            tracing::warn!("Refusing {}: resolves to private address {}", target, addr.ip());
            return Err(UpstreamError::PrivateAddress(addr.ip()));
        }
    }
    Ok(addrs)
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, UpstreamError> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(UpstreamError::Connect(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}
