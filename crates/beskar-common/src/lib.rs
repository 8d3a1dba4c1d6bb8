//! # Beskar Common
//!
//! Shared types, errors, and constants used across Beskar components.
//!
//! ## Modules
//! - `types` - Wire types exchanged through the gossip cluster (BeskarMeta, CaPem)
//! - `error` - Common error types
//! - `constants` - Well-known paths, labels, and defaults

pub mod constants;
pub mod error;
pub mod types;

pub use error::{BeskarError, Result};
pub use types::*;
