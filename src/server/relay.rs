//! One outbound origin connection for a single client session. Spawned by
//! [`crate::server::agent::Agent`] upon a `Connect` block; tears itself down
//! on `Disconnect`, an origin I/O error, or the inbound channel closing.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::protocol::{Block, BlockType, ConnectRequest, SessionId};
use crate::server::agent::Agent;

const ORIGIN_READ_BUF: usize = 4096;
const ORIGIN_READ_TIMEOUT: Duration = Duration::from_secs(60);
const ORIGIN_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(agent: Arc<Agent>, id: SessionId, mut rx: mpsc::Receiver<Block>) {
    let Some(first) = rx.recv().await else {
        return;
    };
    if first.block_type != BlockType::Connect {
        warn!(session = %hex::encode(id), block_type = ?first.block_type, "expected Connect as first block");
        agent.unregister(&id);
        return;
    }

    let request: ConnectRequest = match serde_json::from_slice(&first.body) {
        Ok(r) => r,
        Err(e) => {
            warn!(session = %hex::encode(id), error = %e, "malformed connect request");
            agent.unregister(&id);
            return;
        }
    };

    let origin = match TcpStream::connect((request.address.as_str(), request.port)).await {
        Ok(s) => s,
        Err(e) => {
            debug!(session = %hex::encode(id), host = %request.address, port = request.port, error = %e, "origin dial failed");
            agent.send(id, BlockType::ConnectFailed, Vec::new()).await.ok();
            agent.unregister(&id);
            return;
        }
    };
    origin.set_nodelay(true).ok();

    if agent.send(id, BlockType::Connected, Vec::new()).await.is_err() {
        agent.unregister(&id);
        return;
    }

    let (origin_read, mut origin_write) = origin.into_split();
    let reader = tokio::spawn(origin_to_agent(origin_read, agent.clone(), id));

    while let Some(block) = rx.recv().await {
        match block.block_type {
            BlockType::Data => {
                if !block.body.is_empty() {
                    match timeout(ORIGIN_WRITE_TIMEOUT, origin_write.write_all(&block.body)).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
            BlockType::Disconnect => break,
            other => {
                warn!(session = %hex::encode(id), block_type = ?other, "unexpected block on established relay");
            }
        }
    }

    // Stop the origin reader regardless of why the inbound loop ended — if it
    // already finished on its own this is a harmless no-op, but on
    // Disconnect or a write failure it would otherwise hold the origin
    // socket open until the origin itself times out or closes.
    reader.abort();
    agent.unregister(&id);
    debug!(session = %hex::encode(id), "server relay released");
}

async fn origin_to_agent(mut origin_read: tokio::net::tcp::OwnedReadHalf, agent: Arc<Agent>, id: SessionId) {
    let mut buf = vec![0u8; ORIGIN_READ_BUF];
    let mut block_num = 0u32;
    loop {
        let n = match timeout(ORIGIN_READ_TIMEOUT, origin_read.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => n,
        };
        if agent
            .send_numbered(id, BlockType::Data, buf[..n].to_vec(), block_num)
            .await
            .is_err()
        {
            break;
        }
        block_num = block_num.wrapping_add(1);
    }
    agent.send(id, BlockType::Disconnect, Vec::new()).await.ok();
    agent.unregister(&id);
}
