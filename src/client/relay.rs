//! One TCP connection to the remote server, shared by many local sessions.
//!
//! Splits cleanly into a read loop (demultiplexing incoming blocks to
//! registered agents by session id) and a write path (a channel any agent
//! can push marshaled bytes into). The
//! relay owns the [`crate::crypto::Crypto`] derived during the handshake;
//! agents never see key material directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::{self, Crypto};
use crate::error::{ProxyError, Result};
use crate::protocol::{self, Block, BlockType, SessionId, HEADER_LEN};

const AGENT_CHANNEL_CAPACITY: usize = 64;
const OUT_CHANNEL_CAPACITY: usize = 64;

pub struct Relay {
    id: SessionId,
    crypto: Crypto,
    out_tx: mpsc::Sender<Vec<u8>>,
    agents: DashMap<SessionId, mpsc::Sender<Block>>,
    cancel: CancellationToken,
    released: AtomicBool,
}

impl Relay {
    pub async fn connect(remote: &str, parent: &CancellationToken) -> Result<Arc<Relay>> {
        let mut stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true).ok();

        let crypto = handshake(&mut stream).await?;

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(OUT_CHANNEL_CAPACITY);
        let cancel = parent.child_token();

        let relay = Arc::new(Relay {
            id: protocol::new_session_id(),
            crypto,
            out_tx,
            agents: DashMap::new(),
            cancel,
            released: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(write_half, out_rx, relay.clone()));
        tokio::spawn(read_loop(read_half, relay.clone()));

        Ok(relay)
    }

    pub fn register(&self, id: SessionId, tx: mpsc::Sender<Block>) -> Result<()> {
        match self.agents.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ProxyError::Protocol(format!("duplicate observer for session {}", hex::encode(id))))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, id: &SessionId) {
        self.agents.remove(id);
    }

    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub async fn send(&self, id: SessionId, block_type: BlockType, body: Vec<u8>) -> Result<()> {
        self.send_numbered(id, block_type, body, 0).await
    }

    pub async fn send_numbered(&self, id: SessionId, block_type: BlockType, body: Vec<u8>, block_num: u32) -> Result<()> {
        if self.is_closed() {
            return Err(ProxyError::Closed);
        }
        let body = if body.is_empty() { body } else { self.crypto.encrypt(&body)? };
        let mut block = Block::with_body(id, block_type, body);
        block.block_num = block_num;
        let wire = protocol::marshal(&block);
        self.out_tx.send(wire).await.map_err(|_| ProxyError::Closed)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        for entry in self.agents.iter() {
            debug!(relay = %hex::encode(self.id), session = %hex::encode(entry.key()), "relay closing, notifying agent");
        }
        self.agents.clear();
    }
}

async fn handshake(stream: &mut TcpStream) -> Result<Crypto> {
    stream
        .write_all(&protocol::marshal(&Block::new([0u8; 16], BlockType::HandShake)))
        .await?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let reply = protocol::unmarshal_header(&header)?;
    if reply.block_type != BlockType::HandShake {
        return Err(ProxyError::Handshake(format!(
            "expected HandShake reply, got {:?}",
            reply.block_type
        )));
    }

    let password = crypto::generate_session_password();
    stream
        .write_all(&protocol::marshal(&Block::with_body(
            protocol::new_session_id(),
            BlockType::HandShakeResponse,
            password.clone(),
        )))
        .await?;

    stream.read_exact(&mut header).await?;
    let reply = protocol::unmarshal_header(&header)?;
    if reply.block_type != BlockType::HandShakeFinal {
        return Err(ProxyError::Handshake(format!(
            "expected HandShakeFinal, got {:?}",
            reply.block_type
        )));
    }

    Crypto::new(&password)
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    relay: Arc<Relay>,
) {
    loop {
        tokio::select! {
            _ = relay.cancel.cancelled() => break,
            maybe = out_rx.recv() => {
                let Some(bytes) = maybe else { break };
                if let Err(e) = write_half.write_all(&bytes).await {
                    warn!(error = %e, "relay write failed");
                    break;
                }
            }
        }
    }

    relay.release();
}

async fn read_loop(mut read_half: tokio::net::tcp::OwnedReadHalf, relay: Arc<Relay>) {
    loop {
        let block = match read_block(&mut read_half, &relay.crypto).await {
            Ok(b) => b,
            Err(e) => {
                debug!(relay = %hex::encode(relay.id), error = %e, "relay read loop ending");
                break;
            }
        };

        if block.block_type == BlockType::Disconnect && !block.body.is_empty() {
            match protocol::decode_disconnect_ids(&block.body) {
                Ok(ids) => {
                    for id in ids {
                        relay.agents.remove(&id);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "bad bulk disconnect payload from server");
                }
            }
            continue;
        }

        if let Some(tx) = relay.agents.get(&block.id) {
            let tx = tx.clone();
            let id = block.id;
            if tx.send(block).await.is_err() {
                relay.agents.remove(&id);
            }
        }
    }

    relay.release();
}

async fn read_block(read_half: &mut tokio::net::tcp::OwnedReadHalf, crypto: &Crypto) -> Result<Block> {
    let mut header = [0u8; HEADER_LEN];
    read_half.read_exact(&mut header).await?;
    let mut block = protocol::unmarshal_header(&header)?;

    if block.length > 0 {
        let mut body = vec![0u8; block.length as usize];
        read_half.read_exact(&mut body).await?;
        if block.body_crc32 != crc32fast::hash(&body) {
            return Err(ProxyError::InvalidBlock);
        }
        block.body = crypto.decrypt(&body)?;
    }

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn loopback_listener() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    async fn drive_server_handshake(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let incoming = protocol::unmarshal_header(&header).unwrap();
        assert_eq!(incoming.block_type, BlockType::HandShake);

        stream
            .write_all(&protocol::marshal(&Block::new([0u8; 16], BlockType::HandShake)))
            .await
            .unwrap();

        stream.read_exact(&mut header).await.unwrap();
        let incoming = protocol::unmarshal_header(&header).unwrap();
        assert_eq!(incoming.block_type, BlockType::HandShakeResponse);
        let mut password = vec![0u8; incoming.length as usize];
        stream.read_exact(&mut password).await.unwrap();

        stream
            .write_all(&protocol::marshal(&Block::new(incoming.id, BlockType::HandShakeFinal)))
            .await
            .unwrap();

        password
    }

    #[tokio::test]
    async fn client_handshake_derives_crypto_matching_exchanged_password() {
        let (listener, addr) = loopback_listener().await;

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            drive_server_handshake(&mut stream).await
        });

        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let crypto = handshake(&mut client_stream).await.unwrap();
        let password = server_task.await.unwrap();
        let expected = Crypto::new(&password).unwrap();

        let probe = b"probe";
        assert_eq!(crypto.encrypt(probe).unwrap(), expected.encrypt(probe).unwrap());
    }

    #[tokio::test]
    async fn empty_body_disconnect_is_forwarded_to_the_matching_session_not_treated_as_bulk() {
        let (listener, addr) = loopback_listener().await;
        let session = [7u8; 16];

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            drive_server_handshake(&mut stream).await;
            stream
                .write_all(&protocol::marshal(&Block::new(session, BlockType::Disconnect)))
                .await
                .unwrap();
        });

        let relay = Relay::connect(&addr.to_string(), &CancellationToken::new()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        relay.register(session, tx).unwrap();

        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("relay should forward the Disconnect instead of dropping the connection")
            .expect("channel should not be closed");
        assert_eq!(received.block_type, BlockType::Disconnect);
        assert_eq!(received.id, session);

        server_task.await.unwrap();
    }
}
