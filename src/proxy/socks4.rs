//! SOCKS4 handshake, called from [`crate::proxy::socks5::SocksAdapter`] once
//! the version byte (0x04) has been consumed.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};
use crate::proxy::HandshakeOutcome;

const MAX_USERID_LEN: usize = 1016;

const CD_CONNECT: u8 = 0x01;

const REPLY_GRANTED: [u8; 8] = [0x00, 0x5A, 0, 0, 0, 0, 0, 0];
const REPLY_REJECTED: [u8; 8] = [0x00, 0x5B, 0, 0, 0, 0, 0, 0];
const REPLY_USERID_TOO_LONG: [u8; 8] = [0x00, 0x5D, 0, 0, 0, 0, 0, 0];

pub async fn handshake<S>(stream: &mut S) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 7];
    stream.read_exact(&mut head).await?;
    let cd = head[0];
    let port = u16::from_be_bytes([head[1], head[2]]);
    let ip = Ipv4Addr::new(head[3], head[4], head[5], head[6]);

    let mut userid = Vec::new();
    loop {
        if userid.len() > MAX_USERID_LEN {
            write_reply(stream, &REPLY_USERID_TOO_LONG).await.ok();
            return Err(ProxyError::Protocol("socks4 userid exceeded 1016 bytes".into()));
        }
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        if byte[0] == 0 {
            break;
        }
        userid.push(byte[0]);
    }

    if cd != CD_CONNECT {
        return Err(ProxyError::UnsupportedSocksCommand(cd));
    }

    Ok(HandshakeOutcome {
        host: ip.to_string(),
        port,
        pre_read: Vec::new(),
        kind: crate::proxy::ProxyKind::Socks4,
    })
}

pub async fn write_success<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_reply(stream, &REPLY_GRANTED).await
}

pub async fn write_failure<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_reply(stream, &REPLY_REJECTED).await
}

async fn write_reply<S>(stream: &mut S, reply: &[u8; 8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(reply).await?;
    Ok(())
}
