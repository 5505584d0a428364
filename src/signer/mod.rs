//! Signer management
//!
//! Funded accounts and the pool that leases them to scenarios.

mod pool;
mod types;

pub use pool::{PoolError, SignerPool};
pub use types::{LeaseRequest, PrivateKey, Signer, SignerKind};
