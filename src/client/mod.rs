//! Client half of the tunnel: local proxy front ends accept connections,
//! each becomes an [`agent::Agent`] session multiplexed over a pooled
//! [`relay::Relay`] TCP connection to the remote server.

pub mod agent;
pub mod manager;
pub mod relay;

pub use manager::{ManagerConfig, RelayManager};
