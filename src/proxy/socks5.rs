//! SOCKS5 (RFC 1928/1929) handshake, with first-byte dispatch down to the
//! SOCKS4 path in [`crate::proxy::socks4`].

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};
use crate::proxy::{socks4, HandshakeOutcome, ProxyKind};

const VERSION_SOCKS4: u8 = 0x04;
const VERSION_SOCKS5: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const AUTH_VERSION: u8 = 0x01;
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;

/// Credentials accepted by the SOCKS5 front end. `NoAuth` advertises method
/// 0x00 only; `UserPass` advertises 0x02 and validates against the map.
#[derive(Debug, Clone)]
pub enum SocksAuth {
    NoAuth,
    UserPass(HashMap<String, String>),
}

pub struct SocksAdapter {
    auth: SocksAuth,
    kind: Option<ProxyKind>,
}

impl SocksAdapter {
    pub fn new(auth: SocksAuth) -> Self {
        Self { auth, kind: None }
    }

    pub async fn handshake<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut version = [0u8; 1];
        stream.read_exact(&mut version).await?;

        match version[0] {
            VERSION_SOCKS4 => {
                self.kind = Some(ProxyKind::Socks4);
                socks4::handshake(stream).await
            }
            VERSION_SOCKS5 => {
                self.kind = Some(ProxyKind::Socks5);
                self.handshake_v5(stream).await
            }
            other => Err(ProxyError::UnsupportedSocksVersion(other)),
        }
    }

    async fn handshake_v5<S>(&self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut nmethods = [0u8; 1];
        stream.read_exact(&mut nmethods).await?;
        let mut methods = vec![0u8; nmethods[0] as usize];
        stream.read_exact(&mut methods).await?;

        let chosen = match &self.auth {
            SocksAuth::NoAuth => methods
                .contains(&METHOD_NO_AUTH)
                .then_some(METHOD_NO_AUTH),
            SocksAuth::UserPass(_) => methods
                .contains(&METHOD_USER_PASS)
                .then_some(METHOD_USER_PASS),
        };

        let Some(method) = chosen else {
            stream
                .write_all(&[VERSION_SOCKS5, METHOD_NONE_ACCEPTABLE])
                .await?;
            return Err(ProxyError::UnsupportedSocksAuth);
        };
        stream.write_all(&[VERSION_SOCKS5, method]).await?;

        if method == METHOD_USER_PASS {
            self.authenticate(stream).await?;
        }

        self.read_request(stream).await
    }

    async fn authenticate<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let SocksAuth::UserPass(credentials) = &self.auth else {
            unreachable!("authenticate only called when method is user/pass")
        };

        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        let ulen = head[1] as usize;
        let mut username = vec![0u8; ulen];
        stream.read_exact(&mut username).await?;

        let mut plen_buf = [0u8; 1];
        stream.read_exact(&mut plen_buf).await?;
        let mut password = vec![0u8; plen_buf[0] as usize];
        stream.read_exact(&mut password).await?;

        let username = String::from_utf8_lossy(&username).into_owned();
        let password = String::from_utf8_lossy(&password).into_owned();

        let ok = credentials.get(&username).is_some_and(|p| p == &password);
        if ok {
            stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
            Ok(())
        } else {
            stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
            Err(ProxyError::SocksAuthFailed)
        }
    }

    async fn read_request<S>(&self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        let (version, cmd, _rsv, atyp) = (head[0], head[1], head[2], head[3]);
        if version != VERSION_SOCKS5 {
            return Err(ProxyError::UnsupportedSocksVersion(version));
        }

        let host = match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                Ipv4Addr::from(octets).to_string()
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut domain = vec![0u8; len[0] as usize];
                stream.read_exact(&mut domain).await?;
                String::from_utf8(domain)
                    .map_err(|_| ProxyError::Protocol("socks5 domain is not utf-8".into()))?
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                Ipv6Addr::from(octets).to_string()
            }
            other => {
                self.short_reply(stream, REPLY_CONNECTION_REFUSED).await.ok();
                return Err(ProxyError::Protocol(format!("unsupported socks5 atyp 0x{other:02x}")));
            }
        };

        let mut port_buf = [0u8; 2];
        stream.read_exact(&mut port_buf).await?;
        let port = u16::from_be_bytes(port_buf);

        if cmd != CMD_CONNECT {
            self.short_reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await.ok();
            return Err(ProxyError::UnsupportedSocksCommand(cmd));
        }

        Ok(HandshakeOutcome {
            host,
            port,
            pre_read: Vec::new(),
            kind: ProxyKind::Socks5,
        })
    }

    /// Full success reply: `VER REP RSV ATYP BND.ADDR BND.PORT`, 10 bytes.
    /// BND.ADDR/BND.PORT are always zero-filled; nothing downstream reads them.
    async fn reply<S>(&self, stream: &mut S, code: u8) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut reply = vec![VERSION_SOCKS5, code, 0x00, ATYP_IPV4];
        reply.extend_from_slice(&[0, 0, 0, 0]);
        reply.extend_from_slice(&[0, 0]);
        stream.write_all(&reply).await?;
        Ok(())
    }

    /// Failure reply: `VER REP RSV`, 3 bytes, no address fields.
    async fn short_reply<S>(&self, stream: &mut S, code: u8) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        stream.write_all(&[VERSION_SOCKS5, code, 0x00]).await?;
        Ok(())
    }

    pub async fn write_success<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.kind {
            Some(ProxyKind::Socks4) => socks4::write_success(stream).await,
            _ => self.reply(stream, REPLY_SUCCEEDED).await,
        }
    }

    pub async fn write_failure<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.kind {
            Some(ProxyKind::Socks4) => socks4::write_failure(stream).await,
            _ => self.short_reply(stream, REPLY_CONNECTION_REFUSED).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn no_auth_connect_ipv4() {
        let (mut local, mut test_side) = duplex(4096);
        let mut req = vec![VERSION_SOCKS5, 1, METHOD_NO_AUTH];
        req.extend_from_slice(&[VERSION_SOCKS5, CMD_CONNECT, 0x00, ATYP_IPV4]);
        req.extend_from_slice(&[10, 0, 0, 1]);
        req.extend_from_slice(&80u16.to_be_bytes());
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::NoAuth);
        let outcome = adapter.handshake(&mut local).await.unwrap();

        let mut method_sel = [0u8; 2];
        test_side.read_exact(&mut method_sel).await.unwrap();
        assert_eq!(method_sel, [VERSION_SOCKS5, METHOD_NO_AUTH]);

        assert_eq!(outcome.host, "10.0.0.1");
        assert_eq!(outcome.port, 80);
        assert_eq!(outcome.kind, ProxyKind::Socks5);
    }

    #[tokio::test]
    async fn domain_atyp_is_parsed() {
        let (mut local, mut test_side) = duplex(4096);
        let domain = b"example.com";
        let mut req = vec![VERSION_SOCKS5, 1, METHOD_NO_AUTH];
        req.extend_from_slice(&[VERSION_SOCKS5, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
        req.push(domain.len() as u8);
        req.extend_from_slice(domain);
        req.extend_from_slice(&443u16.to_be_bytes());
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::NoAuth);
        let outcome = adapter.handshake(&mut local).await.unwrap();
        let mut method_sel = [0u8; 2];
        test_side.read_exact(&mut method_sel).await.unwrap();

        assert_eq!(outcome.host, "example.com");
        assert_eq!(outcome.port, 443);
    }

    #[tokio::test]
    async fn user_pass_auth_succeeds() {
        let (mut local, mut test_side) = duplex(4096);
        let mut creds = HashMap::new();
        creds.insert("alice".to_string(), "hunter2".to_string());

        let mut req = vec![VERSION_SOCKS5, 1, METHOD_USER_PASS];
        req.push(AUTH_VERSION);
        req.push(5);
        req.extend_from_slice(b"alice");
        req.push(7);
        req.extend_from_slice(b"hunter2");
        req.extend_from_slice(&[VERSION_SOCKS5, CMD_CONNECT, 0x00, ATYP_IPV4]);
        req.extend_from_slice(&[1, 2, 3, 4]);
        req.extend_from_slice(&22u16.to_be_bytes());
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::UserPass(creds));
        let outcome = adapter.handshake(&mut local).await.unwrap();

        let mut method_sel = [0u8; 2];
        test_side.read_exact(&mut method_sel).await.unwrap();
        assert_eq!(method_sel, [VERSION_SOCKS5, METHOD_USER_PASS]);
        let mut auth_result = [0u8; 2];
        test_side.read_exact(&mut auth_result).await.unwrap();
        assert_eq!(auth_result, [AUTH_VERSION, AUTH_SUCCESS]);

        assert_eq!(outcome.host, "1.2.3.4");
        assert_eq!(outcome.port, 22);
    }

    #[tokio::test]
    async fn user_pass_auth_failure_rejects() {
        let (mut local, mut test_side) = duplex(4096);
        let creds = HashMap::new();

        let mut req = vec![VERSION_SOCKS5, 1, METHOD_USER_PASS];
        req.push(AUTH_VERSION);
        req.push(4);
        req.extend_from_slice(b"nobo");
        req.push(4);
        req.extend_from_slice(b"dyyy");
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::UserPass(creds));
        let err = adapter.handshake(&mut local).await.unwrap_err();
        assert!(matches!(err, ProxyError::SocksAuthFailed));
    }

    #[tokio::test]
    async fn unsupported_command_replies_and_errors() {
        let (mut local, mut test_side) = duplex(4096);
        let mut req = vec![VERSION_SOCKS5, 1, METHOD_NO_AUTH];
        req.extend_from_slice(&[VERSION_SOCKS5, 0x02, 0x00, ATYP_IPV4]); // BIND
        req.extend_from_slice(&[0, 0, 0, 0]);
        req.extend_from_slice(&0u16.to_be_bytes());
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::NoAuth);
        let err = adapter.handshake(&mut local).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedSocksCommand(0x02)));
    }

    #[tokio::test]
    async fn failure_reply_is_three_bytes() {
        let (mut local, mut test_side) = duplex(4096);
        let adapter = SocksAdapter::new(SocksAuth::NoAuth);
        adapter.write_failure(&mut local).await.unwrap();
        drop(local);

        let mut buf = Vec::new();
        test_side.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![VERSION_SOCKS5, REPLY_CONNECTION_REFUSED, 0x00]);
    }

    #[tokio::test]
    async fn success_reply_is_ten_bytes() {
        let (mut local, mut test_side) = duplex(4096);
        let adapter = SocksAdapter::new(SocksAuth::NoAuth);
        adapter.write_success(&mut local).await.unwrap();
        drop(local);

        let mut buf = Vec::new();
        test_side.read_to_end(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            vec![VERSION_SOCKS5, REPLY_SUCCEEDED, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn dispatches_to_socks4_on_version_byte() {
        let (mut local, mut test_side) = duplex(4096);
        let mut req = vec![VERSION_SOCKS4, CMD_CONNECT, 0x00, 0x50];
        req.extend_from_slice(&[127, 0, 0, 1]);
        req.push(0);
        test_side.write_all(&req).await.unwrap();

        let mut adapter = SocksAdapter::new(SocksAuth::NoAuth);
        let outcome = adapter.handshake(&mut local).await.unwrap();
        assert_eq!(outcome.kind, ProxyKind::Socks4);
        assert_eq!(outcome.host, "127.0.0.1");
        assert_eq!(outcome.port, 80);
    }
}
