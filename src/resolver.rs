//! Host name resolution

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Resolved network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host_name: String,
    ip: IpAddr,
}

impl Address {
    pub fn new(host_name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            host_name: host_name.into(),
            ip,
        }
    }

    /// Name the address was resolved from
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Textual IP, the key used for fail counts
    pub fn host_address(&self) -> String {
        self.ip.to_string()
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host_name, self.ip)
    }
}

/// Name service consumed by the transport pool
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `name`; with `all` false only the first candidate is needed
    async fn resolve(&self, name: &str, all: bool) -> Result<Vec<Address>>;
}

/// DNS resolver backed by the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str, all: bool) -> Result<Vec<Address>> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(vec![Address::new(name, ip)]);
        }

        let found = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|e| Error::UnknownHost(format!("{}: {}", name, e)))?;

        let mut addresses: Vec<Address> = Vec::new();
        for addr in found {
            let candidate = Address::new(name, addr.ip());
            if !addresses.contains(&candidate) {
                addresses.push(candidate);
            }
            if !all {
                break;
            }
        }

        debug!("Resolved {} to {} address(es)", name, addresses.len());
        if addresses.is_empty() {
            return Err(Error::UnknownHost(name.to_string()));
        }
        Ok(addresses)
    }
}
