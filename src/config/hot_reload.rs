//! Hot-reload: watches the client config file and reloads it on SIGHUP
//! (Unix) or on a periodic timer (all platforms).
//!
//! # What can be reloaded without restart
//!
//! | Field                 | Effect                              |
//! |------------------------|-------------------------------------|
//! | `log_level`            | filter updated via `log_level_tx`   |
//! | `socks_users`          | applied to the next local handshake |
//! | `pool_size`            | applied on the next relay dial      |
//! | `retry_count`/`retry_delay_secs` | applied on the next relay dial |
//!
//! `listen` requires re-binding the local listener and is **not** applied;
//! a warning is emitted instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (config_rx, log_level_rx) = spawn_config_watcher(
//!     PathBuf::from("client.toml"),
//!     Arc::new(initial_config),
//!     Duration::from_secs(60),
//! );
//!
//! // Each accepted connection reads a fresh snapshot:
//! let config = config_rx.borrow_and_update().clone();
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ClientConfig, LogLevel};

/// Fields that are safe to swap without restarting the local listener.
#[derive(Debug, Clone, PartialEq)]
pub struct HotFields {
    pub log_level: LogLevel,
    pub pool_size: usize,
    pub retry_count: u32,
    pub retry_delay_secs: u64,
    pub socks_users: HashMap<String, String>,
}

impl HotFields {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            log_level: cfg.log_level,
            pool_size: cfg.pool_size,
            retry_count: cfg.retry_count,
            retry_delay_secs: cfg.retry_delay_secs,
            socks_users: cfg.socks_users.clone(),
        }
    }
}

/// Warn about any changed field that requires a restart to take effect.
fn warn_non_hot_changes(old: &ClientConfig, new: &ClientConfig) {
    if old.listen != new.listen {
        warn!(
            "config reload: listen changed ({} -> {}); restart required",
            old.listen, new.listen
        );
    }
    if old.remote != new.remote {
        warn!(
            "config reload: remote changed ('{}' -> '{}'); existing pooled relays keep the old remote until restart",
            old.remote, new.remote
        );
    }
}

/// Spawn the hot-reload watcher task.
///
/// Returns:
/// - `watch::Receiver<Arc<ClientConfig>>` — each accept-loop should call
///   `.borrow_and_update().clone()` per accepted connection.
/// - `watch::Receiver<LogLevel>` — caller should watch this and apply
///   changes to the `tracing` reload handle.
pub fn spawn_config_watcher(
    config_path: PathBuf,
    initial: Arc<ClientConfig>,
    reload_interval: Duration,
) -> (watch::Receiver<Arc<ClientConfig>>, watch::Receiver<LogLevel>) {
    let initial_level = initial.log_level;
    let (config_tx, config_rx) = watch::channel(initial);
    let (log_tx, log_rx) = watch::channel(initial_level);

    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sighup = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::hangup()).expect("failed to register SIGHUP handler")
        };

        let mut interval = tokio::time::interval(reload_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            #[cfg(unix)]
            tokio::select! {
                _ = interval.tick() => {},
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading config from {:?}", config_path);
                }
            }
            #[cfg(not(unix))]
            interval.tick().await;

            let new_cfg = match ClientConfig::load(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    error!("config reload: failed to load {:?}: {}", config_path, e);
                    continue;
                }
            };

            let old_cfg = config_tx.borrow().clone();
            let old_hot = HotFields::from_config(&old_cfg);
            let new_hot = HotFields::from_config(&new_cfg);

            if old_hot == new_hot && old_cfg.listen == new_cfg.listen && old_cfg.remote == new_cfg.remote {
                continue;
            }

            warn_non_hot_changes(&old_cfg, &new_cfg);

            if old_hot.log_level != new_hot.log_level {
                info!("config reload: log_level: '{}' -> '{}'", old_hot.log_level, new_hot.log_level);
                log_tx.send(new_hot.log_level).ok();
            }

            if old_hot.pool_size != new_hot.pool_size {
                info!("config reload: pool_size: {} -> {}", old_hot.pool_size, new_hot.pool_size);
            }

            if old_hot.retry_count != new_hot.retry_count || old_hot.retry_delay_secs != new_hot.retry_delay_secs {
                info!(
                    "config reload: retry policy: count={} delay={}s -> count={} delay={}s",
                    old_hot.retry_count, old_hot.retry_delay_secs, new_hot.retry_count, new_hot.retry_delay_secs
                );
            }

            if old_hot.socks_users != new_hot.socks_users {
                let added: Vec<&String> = new_hot
                    .socks_users
                    .keys()
                    .filter(|u| !old_hot.socks_users.contains_key(*u))
                    .collect();
                let removed: Vec<&String> = old_hot
                    .socks_users
                    .keys()
                    .filter(|u| !new_hot.socks_users.contains_key(*u))
                    .collect();

                if !added.is_empty() {
                    let names: Vec<&str> = added.iter().map(|s| s.as_str()).collect();
                    info!("config reload: socks users added: [{}]", names.join(", "));
                }
                if !removed.is_empty() {
                    let names: Vec<&str> = removed.iter().map(|s| s.as_str()).collect();
                    info!("config reload: socks users removed: [{}]", names.join(", "));
                }
            }

            config_tx.send(Arc::new(new_cfg)).ok();
        }
    });

    (config_rx, log_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_fields_equal_when_only_listen_differs() {
        let base = ClientConfig {
            listen: "127.0.0.1:1080".parse().unwrap(),
            remote: "remote:9000".into(),
            pool_size: 4,
            retry_count: 5,
            retry_delay_secs: 1,
            socks_users: HashMap::new(),
            log_level: LogLevel::Info,
        };
        let mut moved = base.clone();
        moved.listen = "127.0.0.1:1081".parse().unwrap();

        assert_eq!(HotFields::from_config(&base), HotFields::from_config(&moved));
    }
}
