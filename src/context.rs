//! Client context
//!
//! Bundles the read-only configuration with the collaborators the connection
//! core consumes: credentials, name and DFS resolution, the message codec,
//! the channel connector and the transport pool.

use crate::auth::Credentials;
use crate::client::TransportPool;
use crate::config::ClientConfig;
use crate::dfs::{DfsResolver, NoDfs};
use crate::error::Result;
use crate::protocol::Codec;
use crate::resolver::{DnsResolver, NameResolver};
use crate::transport::{Connector, TcpConnector};
use std::fmt;
use std::sync::Arc;

/// Shared client context, cheap to clone
#[derive(Clone)]
pub struct SmbContext {
    config: Arc<ClientConfig>,
    credentials: Arc<dyn Credentials>,
    resolver: Arc<dyn NameResolver>,
    dfs: Arc<dyn DfsResolver>,
    codec: Arc<dyn Codec>,
    connector: Arc<dyn Connector>,
    pool: Arc<TransportPool>,
}

impl SmbContext {
    /// Context with DNS resolution, no DFS, TCP channels and a fresh pool
    pub fn new(
        config: ClientConfig,
        codec: Arc<dyn Codec>,
        credentials: Arc<dyn Credentials>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            credentials,
            resolver: Arc::new(DnsResolver),
            dfs: Arc::new(NoDfs),
            codec,
            connector: Arc::new(TcpConnector),
            pool: TransportPool::new(),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_dfs(mut self, dfs: Arc<dyn DfsResolver>) -> Self {
        self.dfs = dfs;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use `pool` instead of the context's own pool
    pub fn with_pool(mut self, pool: Arc<TransportPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Context sharing everything but the credentials
    pub fn with_credentials(&self, credentials: Arc<dyn Credentials>) -> Self {
        Self {
            credentials,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn Credentials> {
        &self.credentials
    }

    pub fn resolver(&self) -> &Arc<dyn NameResolver> {
        &self.resolver
    }

    pub fn dfs(&self) -> &Arc<dyn DfsResolver> {
        &self.dfs
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn pool(&self) -> &Arc<TransportPool> {
        &self.pool
    }
}

impl fmt::Debug for SmbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbContext")
            .field("config", &self.config)
            .field("principal", &self.credentials.principal())
            .finish_non_exhaustive()
    }
}
