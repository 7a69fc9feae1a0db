//! SMB client connection core
//!
//! Pooled transports with dialect negotiation, per-message signing and
//! encryption, authenticated sessions and tree connections that follow DFS
//! referrals and retry across reconnects. Message encoding is supplied by the
//! caller through [`protocol::Codec`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dfs;
pub mod error;
pub mod netbios;
pub mod protocol;
pub mod resolver;
pub mod transport;

#[cfg(test)]
pub mod e2e_tests;

pub use config::ClientConfig;
pub use context::SmbContext;
pub use error::{Error, NtStatus, Result};
