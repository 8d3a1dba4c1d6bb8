//! # Beskar
//!
//! Node bootstrap for a Beskar cluster: resolves the versioned `beskar.yaml`
//! configuration and prepares the arguments of the gossip membership client.
//!
//! ## Modules
//! - `config` - Configuration loading, migration, and validation
//! - `cluster` - Peer discovery, node metadata, and cluster CA
//! - `retry` - Exponential backoff retry helper
//! - `netutil` - Address helpers

pub mod cluster;
pub mod config;
pub mod netutil;
pub mod retry;
