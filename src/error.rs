//! Crate-wide error type.
//!
//! The taxonomy follows the kinds a tunnel can fail in: framing, protocol,
//! I/O, timeout, and crypto. Framing and protocol errors are fatal to the
//! tunnel or the affected session depending on where they occur; callers
//! decide which by matching on the variant.

use thiserror::Error;

use crate::protocol::HEADER_LEN;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broken bytes: need at least {need} bytes, got {got}")]
    BrokenBytes { need: usize, got: usize },

    #[error("invalid block: crc mismatch")]
    InvalidBlock,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unsupported socks version: 0x{0:02x}")]
    UnsupportedSocksVersion(u8),

    #[error("unsupported socks command: 0x{0:02x}")]
    UnsupportedSocksCommand(u8),

    #[error("no acceptable socks authentication method")]
    UnsupportedSocksAuth,

    #[error("socks authentication failed")]
    SocksAuthFailed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("relay pool exhausted after retrying")]
    PoolExhausted,

    #[error("component is closed")]
    Closed,
}

impl ProxyError {
    pub(crate) fn broken_bytes(got: usize) -> Self {
        ProxyError::BrokenBytes {
            need: HEADER_LEN,
            got,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
