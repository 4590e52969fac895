//! Fixed-size pool of [`Relay`] connections, lazily dialed and handed out
//! round-robin to incoming local sessions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::agent;
use crate::client::relay::Relay;
use crate::error::{ProxyError, Result};
use crate::proxy::Adapter;

const MAX_POOL_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub pool_size: usize,
    pub remote: String,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            pool_size: num_cpus_fallback(),
            remote: String::new(),
            retry_count: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

pub struct RelayManager {
    slots: Vec<RwLock<Option<Arc<Relay>>>>,
    ticket: Mutex<u32>,
    config: ManagerConfig,
    cancel: CancellationToken,
}

impl RelayManager {
    pub fn new(mut config: ManagerConfig) -> Self {
        if config.pool_size == 0 {
            config.pool_size = num_cpus_fallback();
        }
        if config.pool_size > MAX_POOL_SIZE {
            config.pool_size = MAX_POOL_SIZE;
        }
        let mut slots = Vec::with_capacity(config.pool_size);
        slots.resize_with(config.pool_size, || RwLock::new(None));
        RelayManager { slots, ticket: Mutex::new(0), config, cancel: CancellationToken::new() }
    }

    /// Cancel the root context, terminating every relay and every hosted
    /// agent. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn accept<S>(self: &Arc<Self>, local: S, adapter: Adapter)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let relay = match self.get_relay().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "no relay available, dropping local connection");
                return;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = agent::run(local, relay, adapter).await {
                info!(error = %e, "agent session ended with error");
            }
        });
    }

    async fn get_relay(&self) -> Result<Arc<Relay>> {
        let idx = {
            let mut ticket = self.ticket.lock();
            let idx = (*ticket as usize) % self.slots.len();
            *ticket = ticket.wrapping_add(1);
            idx
        };

        {
            let guard = self.slots[idx].read().await;
            if let Some(r) = guard.as_ref() {
                if !r.is_closed() {
                    return Ok(r.clone());
                }
            }
        }

        let mut guard = self.slots[idx].write().await;
        if let Some(r) = guard.as_ref() {
            if !r.is_closed() {
                return Ok(r.clone());
            }
        }

        for attempt in 0..self.config.retry_count {
            match Relay::connect(&self.config.remote, &self.cancel).await {
                Ok(relay) => {
                    *guard = Some(relay.clone());
                    return Ok(relay);
                }
                Err(e) => {
                    error!(attempt, error = %e, "failed to dial remote relay, retrying");
                    sleep(self.config.retry_delay).await;
                }
            }
        }

        Err(ProxyError::PoolExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_clamped() {
        let m = RelayManager::new(ManagerConfig { pool_size: 5_000, ..Default::default() });
        assert_eq!(m.slots.len(), MAX_POOL_SIZE);
    }

    #[test]
    fn zero_pool_size_falls_back_to_available_parallelism() {
        let m = RelayManager::new(ManagerConfig { pool_size: 0, ..Default::default() });
        assert!(!m.slots.is_empty());
    }
}
