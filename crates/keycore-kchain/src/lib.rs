//! K-Chain threshold key backend.
//!
//! # Modules
//!
//! - [`types`]: JSON-RPC request and response bodies
//! - [`rpc`]: the HTTP client and the [`ValidatorRpc`] seam
//! - [`backend`]: [`KChainBackend`], Shamir/KEM share distribution and
//!   threshold BLS signing

pub mod backend;
pub mod rpc;
pub mod types;

pub use backend::{DistributedKeyInfo, DistributedKeyKind, KChainBackend};
pub use rpc::{KChainRpcClient, ValidatorRpc};
