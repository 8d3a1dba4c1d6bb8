//! Core types exchanged between Beskar cluster members.

use serde::{Deserialize, Serialize};

use crate::error::{BeskarError, Result};

/// Node metadata advertised through the membership protocol's metadata slot.
///
/// Encoded with bincode's default (fixed-width, little-endian) layout, so
/// the payload stays small enough for the slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeskarMeta {
    /// Port the local cache listens on
    pub cache_port: u16,
}

impl BeskarMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode to the binary wire format
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| BeskarError::Decode(format!("while encoding node metadata: {e}")))
    }

    /// Decode metadata received from a peer
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| BeskarError::Decode(format!("while decoding node metadata: {e}")))
    }
}

/// PEM-encoded certificate authority minted by the cluster founder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaPem {
    /// Certificate, PEM encoded
    pub cert: String,

    /// Private key, PEM encoded
    pub key: String,
}

impl CaPem {
    /// Serialize for the membership local-state slot
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BeskarError::Crypto(format!("while marshalling CA PEM: {e}")))
    }

    /// Parse a bundle received through the join handshake
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| BeskarError::Crypto(format!("while unmarshalling CA PEM: {e}")))
    }
}
