//! One inbound relay connection from a client. Performs the server side of
//! the handshake, then demultiplexes `Connect`/`Data`/`Disconnect` blocks to
//! per-session [`crate::server::relay`] tasks by session id.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::Crypto;
use crate::error::{ProxyError, Result};
use crate::protocol::{self, Block, BlockType, SessionId, HEADER_LEN};
use crate::server::relay;

const RELAY_CHANNEL_CAPACITY: usize = 16;
const OUT_CHANNEL_CAPACITY: usize = 64;

pub struct Agent {
    id: SessionId,
    crypto: Crypto,
    out_tx: mpsc::Sender<Vec<u8>>,
    relays: DashMap<SessionId, mpsc::Sender<Block>>,
    cancel: CancellationToken,
}

impl Agent {
    pub async fn run(stream: TcpStream) -> Result<()> {
        let mut stream = stream;
        let crypto = handshake(&mut stream).await?;

        let (mut read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(OUT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let agent = Arc::new(Agent {
            id: protocol::new_session_id(),
            crypto,
            out_tx,
            relays: DashMap::new(),
            cancel,
        });

        tokio::spawn(write_back(write_half, out_rx, agent.cancel.clone()));

        debug!(agent = %hex::encode(agent.id), "agent handshake complete");

        loop {
            let block = match read_block(&mut read_half, &agent.crypto).await {
                Ok(b) => b,
                Err(e) => {
                    debug!(agent = %hex::encode(agent.id), error = %e, "agent read loop ending");
                    break;
                }
            };

            let session_id = block.id;
            if let Some(tx) = agent.relays.get(&session_id) {
                let tx = tx.clone();
                if tx.send(block).await.is_err() {
                    agent.relays.remove(&session_id);
                }
            } else if block.block_type == BlockType::Connect {
                let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
                agent.relays.insert(session_id, tx.clone());
                tokio::spawn(relay::run(agent.clone(), session_id, rx));
                if tx.send(block).await.is_err() {
                    agent.relays.remove(&session_id);
                }
            } else {
                warn!(session = %hex::encode(session_id), block_type = ?block.block_type, "block for unknown or closed relay");
            }
        }

        agent.cancel.cancel();
        agent.relays.clear();
        Ok(())
    }

    pub fn unregister(&self, id: &SessionId) {
        self.relays.remove(id);
    }

    pub async fn send(&self, id: SessionId, block_type: BlockType, body: Vec<u8>) -> Result<()> {
        self.send_numbered(id, block_type, body, 0).await
    }

    pub async fn send_numbered(&self, id: SessionId, block_type: BlockType, body: Vec<u8>, block_num: u32) -> Result<()> {
        let body = if body.is_empty() { body } else { self.crypto.encrypt(&body)? };
        let mut block = Block::with_body(id, block_type, body);
        block.block_num = block_num;
        let wire = protocol::marshal(&block);
        self.out_tx.send(wire).await.map_err(|_| ProxyError::Closed)
    }
}

async fn handshake(stream: &mut TcpStream) -> Result<Crypto> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let incoming = protocol::unmarshal_header(&header)?;
    if incoming.block_type != BlockType::HandShake {
        return Err(ProxyError::Handshake(format!(
            "expected HandShake, got {:?}",
            incoming.block_type
        )));
    }
    stream
        .write_all(&protocol::marshal(&Block::new([0u8; 16], BlockType::HandShake)))
        .await?;

    stream.read_exact(&mut header).await?;
    let incoming = protocol::unmarshal_header(&header)?;
    if incoming.block_type != BlockType::HandShakeResponse {
        return Err(ProxyError::Handshake(format!(
            "expected HandShakeResponse, got {:?}",
            incoming.block_type
        )));
    }
    if incoming.length <= 0 {
        return Err(ProxyError::Handshake("handshake response carried no password".into()));
    }
    let mut password = vec![0u8; incoming.length as usize];
    stream.read_exact(&mut password).await?;
    if incoming.body_crc32 != crc32fast::hash(&password) {
        return Err(ProxyError::InvalidBlock);
    }

    let crypto = Crypto::new(&password)?;

    stream
        .write_all(&protocol::marshal(&Block::new(incoming.id, BlockType::HandShakeFinal)))
        .await?;

    Ok(crypto)
}

async fn write_back(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            maybe = out_rx.recv() => {
                let Some(bytes) = maybe else { return };
                if let Err(e) = write_half.write_all(&bytes).await {
                    warn!(error = %e, "agent write back failed");
                    return;
                }
            }
        }
    }
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
