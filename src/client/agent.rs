//! One local session: a proxy-protocol handshake on the local socket,
//! followed by bidirectional forwarding over the owning [`Relay`].

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::relay::Relay;
use crate::error::{ProxyError, Result};
use crate::protocol::{self, Block, BlockType, ConnectRequest, SessionId};
use crate::proxy::Adapter;

const INBOUND_CHANNEL_CAPACITY: usize = 64;
const READ_BUF: usize = 4096;
const CONNECTED_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run<S>(mut local: S, relay: Arc<Relay>, mut adapter: Adapter) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let id: SessionId = protocol::new_session_id();

    let outcome = match adapter.handshake(&mut local).await {
        Ok(o) => o,
        Err(e) => {
            adapter.write_failure(&mut local).await.ok();
            return Err(e);
        }
    };

    let (tx, mut rx) = mpsc::channel::<Block>(INBOUND_CHANNEL_CAPACITY);
    relay.register(id, tx)?;

    let request = ConnectRequest { address: outcome.host.clone(), port: outcome.port };
    let body = serde_json::to_vec(&request)
        .map_err(|e| ProxyError::Protocol(format!("failed to encode connect request: {e}")))?;

    if let Err(e) = relay.send(id, BlockType::Connect, body).await {
        relay.unregister(&id);
        return Err(e);
    }

    let reply = match timeout(CONNECTED_TIMEOUT, rx.recv()).await {
        Ok(Some(block)) => block,
        Ok(None) => {
            relay.unregister(&id);
            return Err(ProxyError::Closed);
        }
        Err(_) => {
            adapter.write_failure(&mut local).await.ok();
            relay.unregister(&id);
            return Err(ProxyError::Timeout("Connected reply"));
        }
    };
    match reply.block_type {
        BlockType::Connected => {
            debug!(session = %hex::encode(id), "remote connected");
            adapter.write_success(&mut local).await?;
        }
        BlockType::ConnectFailed => {
            info!(session = %hex::encode(id), host = %outcome.host, port = outcome.port, "remote connect failed");
            adapter.write_failure(&mut local).await.ok();
            relay.unregister(&id);
            return Err(ProxyError::Protocol("remote refused connect".into()));
        }
        other => {
            warn!(session = %hex::encode(id), block_type = ?other, "unexpected reply to connect");
            relay.unregister(&id);
            return Err(ProxyError::Protocol(format!("unexpected reply type {other:?}")));
        }
    }

    let mut block_num = 0u32;
    if !outcome.pre_read.is_empty() {
        relay.send_numbered(id, BlockType::Data, outcome.pre_read, block_num).await?;
        block_num = block_num.wrapping_add(1);
    }

    let (mut local_read, mut local_write) = tokio::io::split(local);

    let upload = {
        let relay = relay.clone();
        async move {
            let mut buf = vec![0u8; READ_BUF];
            loop {
                let n = match local_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if relay
                    .send_numbered(id, BlockType::Data, buf[..n].to_vec(), block_num)
                    .await
                    .is_err()
                {
                    break;
                }
                block_num = block_num.wrapping_add(1);
            }
            relay.send(id, BlockType::Disconnect, Vec::new()).await.ok();
        }
    };

    let download = async move {
        while let Some(block) = rx.recv().await {
            match block.block_type {
                BlockType::Data => {
                    if local_write.write_all(&block.body).await.is_err() {
                        break;
                    }
                }
                BlockType::Disconnect => break,
                other => {
                    warn!(session = %hex::encode(id), block_type = ?other, "unexpected block while streaming");
                }
            }
        }
    };

    tokio::select! {
        _ = upload => {}
        _ = download => {}
    }

    relay.unregister(&id);
    debug!(session = %hex::encode(id), "agent finished");
    Ok(())
}
