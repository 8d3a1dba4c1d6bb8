//! Cluster bootstrap modules.
//!
//! Implements:
//! - Gossip peer discovery (static list or Kubernetes endpoints)
//! - Cluster certificate authority minting
//! - Membership client argument preparation

mod gossip;
mod mtls;
mod peers;

pub use gossip::{MembershipArgs, MembershipSummary, get_key, get_meta, get_state, prepare};
pub use mtls::{KeyType, generate_ca};
pub use peers::{
    BootstrapOptions, Deployment, EndpointPort, EndpointSubset, KubeEndpointLister, PeerLister,
    resolve_peers,
};
