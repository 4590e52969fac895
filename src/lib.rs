//! Encrypted, multiplexed TCP proxy tunnel.
//!
//! A client accepts local HTTP/HTTPS and SOCKS4/5 connections and forwards
//! each as a session multiplexed over a pooled TCP connection to a server,
//! which demultiplexes sessions back out to their origin hosts. Sessions on
//! one tunnel connection share a single AES-256-CBC key derived from a
//! per-tunnel password exchanged during the handshake; see [`crypto`] and
//! [`protocol`] for the wire details.
//!
//! This crate provides the building blocks — [`client`] and [`server`] own
//! the task lifecycles, [`proxy`] the local front-end protocols — but does
//! not itself provide a binary entry point, CLI, or logging subscriber
//! configuration; those are left to an embedding application.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod server;

pub use error::{ProxyError, Result};
