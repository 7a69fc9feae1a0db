//! Transport pool
//!
//! Hands out transports for a target, reusing pooled connections where the
//! caller's security requirements allow and failing over across resolved
//! addresses in order of past failures.

use super::lock;
use super::transport::Transport;
use crate::config::DEFAULT_PORT;
use crate::context::SmbContext;
use crate::error::{Error, Result};
use crate::resolver::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

#[derive(Default)]
struct Connections {
    pooled: Vec<Arc<Transport>>,
    non_pooled: Vec<Arc<Transport>>,
}

/// Registry of transports shared by every context built on it
pub struct TransportPool {
    this: Weak<TransportPool>,
    connections: Mutex<Connections>,
    fail_counts: Mutex<HashMap<String, u32>>,
}

impl TransportPool {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            connections: Mutex::new(Connections::default()),
            fail_counts: Mutex::new(HashMap::new()),
        })
    }

    /// Transport for one address, not yet connected when newly created
    ///
    /// An `exclusive` transport is never handed out again. The returned
    /// transport carries one usage for the caller.
    pub fn get_smb_transport(
        &self,
        ctx: &SmbContext,
        address: &Address,
        port: u16,
        exclusive: bool,
        force_signing: bool,
    ) -> Arc<Transport> {
        let port = if port == 0 { DEFAULT_PORT } else { port };
        let mut connections = lock(&self.connections);

        if !exclusive {
            if let Some(existing) =
                find_connection(&connections.pooled, ctx, address, port, force_signing, false)
            {
                trace!("Reusing transport {}", existing.id());
                return existing.acquire();
            }
        }

        let transport = Transport::new(
            ctx,
            address.clone(),
            port,
            force_signing || ctx.config().signing_enforced,
            self.this.clone(),
        );
        debug!(
            "New {} transport {} to {}:{}",
            if exclusive { "exclusive" } else { "pooled" },
            transport.id(),
            address,
            port
        );
        if exclusive {
            connections.non_pooled.push(transport.clone());
        } else {
            connections.pooled.push(transport.clone());
        }
        transport
    }

    /// Connected transport for `name`, trying each resolved address
    ///
    /// Addresses that failed less often are tried first. When every address
    /// fails the error of the last attempt is returned.
    pub async fn get_transport(
        &self,
        ctx: &SmbContext,
        name: &str,
        port: u16,
        exclusive: bool,
        force_signing: bool,
    ) -> Result<Arc<Transport>> {
        let mut addresses = ctx.resolver().resolve(name, true).await?;
        if addresses.is_empty() {
            return Err(Error::UnknownHost(name.to_string()));
        }
        {
            let fail_counts = lock(&self.fail_counts);
            addresses.sort_by_key(|a| fail_counts.get(&a.host_address()).copied().unwrap_or(0));
        }

        if !exclusive {
            let connections = lock(&self.connections);
            for address in &addresses {
                if let Some(existing) =
                    find_connection(&connections.pooled, ctx, address, port, force_signing, true)
                {
                    trace!("Reusing connected transport {}", existing.id());
                    return Ok(existing.acquire());
                }
            }
        }

        let mut last_error = None;
        for address in &addresses {
            let transport = self.get_smb_transport(ctx, address, port, exclusive, force_signing);
            match transport.ensure_connected().await {
                Ok(_) => return Ok(transport),
                Err(e @ Error::Lifecycle(_)) => return Err(e),
                Err(e) => {
                    debug!("Connecting to {} failed: {}", address, e);
                    self.remove_transport(&transport);
                    if let Err(release) = transport.release() {
                        warn!("Releasing failed transport: {}", release);
                    }
                    *lock(&self.fail_counts)
                        .entry(address.host_address())
                        .or_insert(0) += 1;
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::UnknownHost(name.to_string())))
    }

    /// Forget `transport`; idempotent
    pub fn remove_transport(&self, transport: &Transport) -> bool {
        let mut connections = lock(&self.connections);
        let before = connections.pooled.len() + connections.non_pooled.len();
        connections
            .pooled
            .retain(|t| !std::ptr::eq(Arc::as_ptr(t), transport));
        connections
            .non_pooled
            .retain(|t| !std::ptr::eq(Arc::as_ptr(t), transport));
        let removed = before != connections.pooled.len() + connections.non_pooled.len();
        if removed {
            trace!("Removed transport {} from pool", transport.id());
        }
        removed
    }

    /// Whether `transport` is pooled or exclusive in this pool
    pub fn contains(&self, transport: &Arc<Transport>) -> bool {
        let connections = lock(&self.connections);
        connections
            .pooled
            .iter()
            .chain(connections.non_pooled.iter())
            .any(|t| Arc::ptr_eq(t, transport))
    }

    pub fn num_pooled(&self) -> usize {
        lock(&self.connections).pooled.len()
    }

    pub fn num_exclusive(&self) -> usize {
        lock(&self.connections).non_pooled.len()
    }

    /// Connection failures recorded for `address`
    pub fn fail_count(&self, address: &Address) -> u32 {
        lock(&self.fail_counts)
            .get(&address.host_address())
            .copied()
            .unwrap_or(0)
    }

    /// Legacy SMB1 challenge of the server at `address`
    pub async fn get_challenge(
        &self,
        ctx: &SmbContext,
        address: &Address,
        port: u16,
    ) -> Result<Option<Vec<u8>>> {
        let force_signing = !ctx.credentials().is_anonymous() && ctx.config().ipc_signing_enforced;
        let transport = self.get_smb_transport(ctx, address, port, false, force_signing);
        let result = transport.ensure_connected().await;
        let key = transport.server_encryption_key();
        transport.release()?;
        result?;
        Ok(key)
    }

    /// Authenticate against the configured logon share of `address`
    pub async fn logon(&self, ctx: &SmbContext, address: &Address, port: u16) -> Result<()> {
        let share = ctx
            .config()
            .logon_share
            .clone()
            .ok_or_else(|| Error::InvalidParameter("No logon share configured".to_string()))?;
        let force_signing = ctx.config().ipc_signing_enforced;
        let transport = self.get_smb_transport(ctx, address, port, false, force_signing);
        if let Err(e) = transport.ensure_connected().await {
            transport.release()?;
            return Err(e);
        }

        let session = transport
            .get_smb_session(ctx, Some(address.host_name()), None)
            .await;
        transport.release()?;
        let tree = session.get_smb_tree(&share, None);
        session.release()?;

        let result = tree.tree_connect().await;
        tree.release()?;
        result
    }

    /// Disconnect every transport without logging off
    ///
    /// Returns whether any transport was still in use.
    pub async fn close(&self) -> bool {
        let transports: Vec<_> = {
            let mut guard = lock(&self.connections);
            let connections = &mut *guard;
            connections
                .pooled
                .drain(..)
                .chain(connections.non_pooled.drain(..))
                .collect()
        };

        let mut in_use = false;
        for transport in transports {
            match transport.disconnect(true, false).await {
                Ok(used) => in_use |= used,
                Err(e) => warn!("Failed to close transport {}: {}", transport.id(), e),
            }
        }
        in_use
    }
}

fn find_connection<'a>(
    transports: &'a [Arc<Transport>],
    ctx: &SmbContext,
    address: &Address,
    port: u16,
    force_signing: bool,
    connected_only: bool,
) -> Option<&'a Arc<Transport>> {
    let config = ctx.config();
    transports.iter().find(|t| {
        if !t.matches(address, port) || t.is_disconnected() || t.is_failed() {
            return false;
        }
        if connected_only && !t.is_connected() {
            return false;
        }
        if config.session_limit != 0 && t.num_sessions() >= config.session_limit {
            trace!("Transport {} reached the session limit", t.id());
            return false;
        }
        if force_signing && !t.is_signing_enforced() {
            trace!("Transport {} does not enforce signing", t.id());
            return false;
        }
        if !force_signing
            && !config.signing_enforced
            && t.is_signing_forced()
            && !t.negotiation().map_or(false, |n| n.signing_required())
        {
            trace!("Transport {} signs more than needed", t.id());
            return false;
        }
        t.can_reuse(ctx, force_signing)
    })
}
