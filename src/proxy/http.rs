//! HTTP and HTTPS (CONNECT) front-end adapter.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};
use crate::proxy::{HandshakeOutcome, ProxyKind};

const MAX_HEADER_BYTES: usize = 10 * 1024;
const READ_CHUNK: usize = 1024;

pub const HTTPS_CONNECT_SUCCESS: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

#[derive(Debug, Default)]
pub struct HttpAdapter {
    kind: Option<ProxyKind>,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handshake<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::new();
        let header_end = loop {
            if let Some(pos) = find_double_crlf(&buf) {
                break pos + 4;
            }
            if buf.len() > MAX_HEADER_BYTES {
                return Err(ProxyError::Protocol(
                    "http handshake exceeded 10 KiB without a blank line".into(),
                ));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProxyError::Protocol(
                    "local socket closed during http handshake".into(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = &buf[..header_end];
        let trailing = buf[header_end..].to_vec();

        let line_end = head
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| ProxyError::Protocol("missing request line terminator".into()))?;
        let request_line = std::str::from_utf8(&head[..line_end])
            .map_err(|_| ProxyError::Protocol("request line is not utf-8".into()))?;

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| ProxyError::Protocol("empty request line".into()))?;
        let request_uri = parts
            .next()
            .ok_or_else(|| ProxyError::Protocol("missing request-uri".into()))?;

        if method.eq_ignore_ascii_case("CONNECT") {
            self.kind = Some(ProxyKind::Https);
            let (host, port) = split_host_port(request_uri, 80)?;
            Ok(HandshakeOutcome {
                host,
                port,
                pre_read: trailing,
                kind: ProxyKind::Https,
            })
        } else {
            self.kind = Some(ProxyKind::Http);
            let url = url::Url::parse(request_uri)
                .map_err(|e| ProxyError::Protocol(format!("bad absolute-uri: {e}")))?;
            let host = url
                .host_str()
                .ok_or_else(|| ProxyError::Protocol("absolute-uri has no host".into()))?
                .to_string();
            let port = url.port_or_known_default().unwrap_or(80);

            let mut pre_read = head.to_vec();
            pre_read.extend_from_slice(&trailing);

            Ok(HandshakeOutcome {
                host,
                port,
                pre_read,
                kind: ProxyKind::Http,
            })
        }
    }

    pub async fn write_success<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if self.kind == Some(ProxyKind::Https) {
            stream.write_all(HTTPS_CONNECT_SUCCESS).await?;
        }
        Ok(())
    }

    pub async fn write_failure<S>(&self, _stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        // No standard failure reply for a bare HTTP/HTTPS front end; the
        // caller closes the local socket.
        Ok(())
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let authority = authority
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    match authority.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ProxyError::Protocol(format!("invalid port: {port_str}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn plain_get_is_forwarded_verbatim() {
        let (mut local, mut test_side) = duplex(4096);
        let request = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        test_side.write_all(request).await.unwrap();

        let mut adapter = HttpAdapter::new();
        let outcome = adapter.handshake(&mut local).await.unwrap();

        assert_eq!(outcome.kind, ProxyKind::Http);
        assert_eq!(outcome.host, "example.com");
        assert_eq!(outcome.port, 80);
        assert_eq!(outcome.pre_read, request);
    }

    #[tokio::test]
    async fn connect_parses_host_and_port_and_empty_pre_read() {
        let (mut local, mut test_side) = duplex(4096);
        let request = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        test_side.write_all(request).await.unwrap();

        let mut adapter = HttpAdapter::new();
        let outcome = adapter.handshake(&mut local).await.unwrap();

        assert_eq!(outcome.kind, ProxyKind::Https);
        assert_eq!(outcome.host, "example.com");
        assert_eq!(outcome.port, 443);
        assert!(outcome.pre_read.is_empty());

        adapter.write_success(&mut local).await.unwrap();
        let mut resp = [0u8; HTTPS_CONNECT_SUCCESS.len()];
        test_side.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, HTTPS_CONNECT_SUCCESS);
    }

    #[tokio::test]
    async fn connect_preserves_pipelined_trailing_bytes() {
        let (mut local, mut test_side) = duplex(4096);
        let mut request = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n".to_vec();
        request.extend_from_slice(b"\x16\x03\x01\x00\x2a"); // fake TLS ClientHello start
        test_side.write_all(&request).await.unwrap();

        let mut adapter = HttpAdapter::new();
        let outcome = adapter.handshake(&mut local).await.unwrap();
        assert_eq!(outcome.pre_read, b"\x16\x03\x01\x00\x2a");
    }
}
