//! Gossip membership bootstrap.
//!
//! Prepares everything the membership client needs to join (or found) the
//! cluster: a fresh member id, the peer set, the bind address, the decoded
//! secret key, the encoded node metadata, and, on the founding node only,
//! a freshly minted cluster CA as local state.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Months, Utc};
use serde::Serialize;
use uuid::Uuid;

use beskar_common::constants::{CA_COMMON_NAME, CA_VALIDITY_YEARS};
use beskar_common::{BeskarError, BeskarMeta, Result};

use super::mtls::{self, KeyType};
use super::peers::{BootstrapOptions, Deployment, PeerLister, resolve_peers};
use crate::config::BeskarConfig;
use crate::netutil;

/// Construction arguments of the membership client
#[derive(Clone, Debug)]
pub struct MembershipArgs {
    /// Random member identifier, new on every start
    pub id: String,
    /// Peers to contact when joining
    pub peers: Vec<String>,
    /// Gossip bind address (host:port)
    pub bind_addr: String,
    /// Shared secret key
    pub secret_key: Vec<u8>,
    /// Encoded [`BeskarMeta`]
    pub node_meta: Vec<u8>,
    /// Serialized CA bundle, only set on the founding node
    pub local_state: Option<Vec<u8>>,
}

/// Loggable view of [`MembershipArgs`], without secret material
#[derive(Clone, Debug, Serialize)]
pub struct MembershipSummary {
    pub id: String,
    pub bind_addr: String,
    pub peers: Vec<String>,
    pub cache_port: u16,
    pub founder: bool,
}

impl MembershipArgs {
    /// Whether this node minted the cluster state
    pub fn is_founder(&self) -> bool {
        self.local_state.is_some()
    }

    pub fn summary(&self) -> Result<MembershipSummary> {
        Ok(MembershipSummary {
            id: self.id.clone(),
            bind_addr: self.bind_addr.clone(),
            peers: self.peers.clone(),
            cache_port: BeskarMeta::decode(&self.node_meta)?.cache_port,
            founder: self.is_founder(),
        })
    }
}

/// Prepare the membership client arguments for this node
pub async fn prepare<L: PeerLister>(
    config: &BeskarConfig,
    lister: &L,
    options: &BootstrapOptions,
) -> Result<MembershipArgs> {
    let id = Uuid::new_v4().to_string();

    let peers = resolve_peers(config, lister, options).await?;
    let secret_key = get_key(config)?;
    let node_meta = get_meta(config)?;
    let local_state = get_state(&options.deployment, peers.len())?;
    let bind_addr = bind_address(&config.gossip.addr)?;

    tracing::info!(
        id = %id,
        bind = %bind_addr,
        peers = peers.len(),
        founder = local_state.is_some(),
        "Gossip membership prepared"
    );

    Ok(MembershipArgs {
        id,
        peers,
        bind_addr,
        secret_key,
        node_meta,
        local_state,
    })
}

/// Decode the shared gossip secret
pub fn get_key(config: &BeskarConfig) -> Result<Vec<u8>> {
    STANDARD
        .decode(&config.gossip.key)
        .map_err(|e| BeskarError::Decode(format!("while decoding gossip key: {e}")))
}

/// Encode this node's metadata
pub fn get_meta(config: &BeskarConfig) -> Result<Vec<u8>> {
    let (_, port) = netutil::split_host_port(&config.cache.addr)?;

    let mut meta = BeskarMeta::new();
    meta.cache_port = port
        .parse()
        .map_err(|e| BeskarError::Decode(format!("while parsing cache address: {e}")))?;

    meta.encode()
}

/// Mint the cluster CA when this node founds the cluster.
///
/// Outside Kubernetes every node mints its own CA; inside, only a node
/// that found no peer does, the others receive it when joining.
pub fn get_state(deployment: &Deployment, num_peers: usize) -> Result<Option<Vec<u8>>> {
    if num_peers > 0 && deployment.is_orchestrated() {
        return Ok(None);
    }

    let not_after = Utc::now()
        .checked_add_months(Months::new(CA_VALIDITY_YEARS as u32 * 12))
        .ok_or_else(|| BeskarError::Crypto("CA expiry out of range".to_string()))?;
    let ca = mtls::generate_ca(CA_COMMON_NAME, not_after, KeyType::Ecdsa)?;

    tracing::info!(not_after = %not_after, "Minted cluster certificate authority");
    ca.to_bytes().map(Some)
}

/// Gossip bind address, an empty host binds all interfaces
fn bind_address(addr: &str) -> Result<String> {
    let (host, port) = netutil::split_host_port(addr)?;
    let host = if host.is_empty() { "0.0.0.0" } else { host.as_str() };
    Ok(netutil::join_host_port(host, &port))
}
