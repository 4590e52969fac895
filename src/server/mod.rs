//! Server half of the tunnel: one [`agent::Agent`] per inbound relay
//! connection, demultiplexing to per-session [`relay::relay`] outbound
//! connections.

pub mod agent;
pub mod relay;

pub use agent::Agent;
