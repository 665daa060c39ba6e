//! HTTP wire layer for quorumkv.
//!
//! Provides:
//! - `HttpReplicaClient`: implements `ReplicaClient` over hyper for
//!   proxied single-replica requests
//! - `ServerState` / `serve`: the public HTTP surface and the
//!   intra-cluster proxy protocol, on one listener
//! - `wire`: header names and the percent codec shared by both sides

pub mod client;
pub mod server;
pub mod wire;

pub use client::HttpReplicaClient;
pub use server::{serve, ServerState};
