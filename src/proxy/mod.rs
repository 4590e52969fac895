//! Front-end proxy-protocol adapters: parse an incoming HTTP/HTTPS or
//! SOCKS4/5 handshake from a local client down to the point where a
//! destination host/port is known, then emit the protocol's own
//! success/failure reply.

pub mod http;
pub mod socks4;
pub mod socks5;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

pub use http::HttpAdapter;
pub use socks5::SocksAuth;

/// Which front-end protocol a handshake turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Https,
    Socks4,
    Socks5,
}

/// Result of a successful front-end handshake: where to connect, and any
/// bytes already read off the local socket that belong to the subsequent
/// origin stream and must be replayed once the tunnel is established.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub host: String,
    pub port: u16,
    pub pre_read: Vec<u8>,
    pub kind: ProxyKind,
}

/// The front-end a client agent drives. `Http` subsumes HTTP and HTTPS
/// CONNECT (disambiguated at handshake time); `Socks` subsumes SOCKS4 and
/// SOCKS5 (disambiguated by first byte).
pub enum Adapter {
    Http(http::HttpAdapter),
    Socks(socks5::SocksAdapter),
}

impl Adapter {
    pub fn http() -> Self {
        Adapter::Http(http::HttpAdapter::default())
    }

    pub fn socks(auth: SocksAuth) -> Self {
        Adapter::Socks(socks5::SocksAdapter::new(auth))
    }

    pub async fn handshake<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self {
            Adapter::Http(a) => a.handshake(stream).await,
            Adapter::Socks(a) => a.handshake(stream).await,
        }
    }

    /// Write the protocol's success reply (empty for plain HTTP).
    pub async fn write_success<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin + Send,
    {
        match self {
            Adapter::Http(a) => a.write_success(stream).await,
            Adapter::Socks(a) => a.write_success(stream).await,
        }
    }

    /// Write the protocol's failure reply, best-effort.
    pub async fn write_failure<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin + Send,
    {
        match self {
            Adapter::Http(a) => a.write_failure(stream).await,
            Adapter::Socks(a) => a.write_failure(stream).await,
        }
    }
}

/// Read one byte without consuming it from callers that still need it in
/// the stream-specific dispatch (SOCKS version byte). Small helper shared
/// by the socks4/socks5 readers.
pub(crate) async fn read_exact_vec<S>(stream: &mut S, len: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub(crate) async fn write_all<S>(stream: &mut S, data: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    Ok(())
}
