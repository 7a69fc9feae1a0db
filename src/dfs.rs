//! DFS referral boundary
//!
//! A referral redirects a `\server\share\path` prefix to another
//! server and share. The tree layer asks a [`DfsResolver`] before sending
//! path-carrying requests and again after a PATH_NOT_COVERED status.

use crate::client::lock;
use crate::context::SmbContext;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Redirection of a path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsReferral {
    /// Target server
    pub server: String,
    /// Target share
    pub share: String,
    /// Path inside the target share that replaces the consumed prefix
    pub path: Option<String>,
    /// Characters of the requested `\server\share\path` covered by the referral
    pub path_consumed: usize,
    /// How long the referral may be cached
    pub ttl: Duration,
}

impl DfsReferral {
    pub fn new(server: impl Into<String>, share: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            share: share.into(),
            path: None,
            path_consumed: 0,
            ttl: Duration::from_secs(300),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Share-relative path on the target for a requested full path
    pub fn resolve_path(&self, requested: &str) -> String {
        let remaining = requested.get(self.path_consumed..).unwrap_or("");
        let mut path = String::new();
        if let Some(prefix) = self.path.as_deref() {
            let prefix = prefix.trim_matches('\\');
            if !prefix.is_empty() {
                path.push('\\');
                path.push_str(prefix);
            }
        }
        if !remaining.is_empty() {
            if !remaining.starts_with('\\') {
                path.push('\\');
            }
            path.push_str(remaining);
        }
        if path.is_empty() {
            path.push('\\');
        }
        path
    }
}

/// DFS referral source
#[async_trait]
pub trait DfsResolver: Send + Sync {
    /// Referral for `\domain\share\path`, or `None` when the path is not redirected
    async fn resolve(
        &self,
        ctx: &SmbContext,
        domain: &str,
        share: &str,
        path: &str,
    ) -> Result<Option<DfsReferral>>;

    /// Drop cached knowledge after the server reported the path is not covered
    fn invalidate(&self, _domain: &str, _share: &str, _path: &str) {}
}

/// Resolver for environments without DFS
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDfs;

#[async_trait]
impl DfsResolver for NoDfs {
    async fn resolve(
        &self,
        _ctx: &SmbContext,
        _domain: &str,
        _share: &str,
        _path: &str,
    ) -> Result<Option<DfsReferral>> {
        Ok(None)
    }
}

struct CachedReferral {
    referral: DfsReferral,
    expires: Instant,
}

/// Administratively configured referral table
///
/// Prefixes are matched case-insensitively on path component boundaries; the
/// longest live prefix wins. Entries past their TTL are dropped on lookup.
#[derive(Default)]
pub struct StaticDfsResolver {
    entries: Mutex<HashMap<String, CachedReferral>>,
}

impl StaticDfsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect `prefix` (`\server\share[\path]`) to `referral`
    pub fn add(&self, prefix: &str, mut referral: DfsReferral) {
        let key = normalize(prefix);
        referral.path_consumed = key.len();
        let expires = Instant::now() + referral.ttl;
        lock(&self.entries).insert(key, CachedReferral { referral, expires });
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, full_path: &str) -> Option<DfsReferral> {
        let wanted = normalize(full_path);
        let mut entries = lock(&self.entries);
        let now = Instant::now();
        entries.retain(|_, cached| cached.expires > now);

        entries
            .iter()
            .filter(|(prefix, _)| covers(prefix, &wanted))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, cached)| cached.referral.clone())
    }
}

#[async_trait]
impl DfsResolver for StaticDfsResolver {
    async fn resolve(
        &self,
        _ctx: &SmbContext,
        domain: &str,
        share: &str,
        path: &str,
    ) -> Result<Option<DfsReferral>> {
        let full = full_path(domain, share, path);
        let referral = self.lookup(&full);
        if let Some(r) = &referral {
            debug!("DFS referral for {}: \\{}\\{}", full, r.server, r.share);
        }
        Ok(referral)
    }

    fn invalidate(&self, domain: &str, share: &str, path: &str) {
        let wanted = normalize(&full_path(domain, share, path));
        lock(&self.entries).retain(|prefix, _| !covers(prefix, &wanted));
    }
}

/// `\domain\share\path` with a single separator between parts
pub fn full_path(domain: &str, share: &str, path: &str) -> String {
    let mut full = format!("\\{}\\{}", domain, share);
    let path = path.trim_end_matches('\\');
    if !path.is_empty() {
        if !path.starts_with('\\') {
            full.push('\\');
        }
        full.push_str(path);
    }
    full
}

/// `prefix` is `path` or one of its parent components
fn covers(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
        && (path.len() == prefix.len() || path[prefix.len()..].starts_with('\\'))
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('\\');
    let mut out = String::with_capacity(trimmed.len() + 1);
    if !trimmed.starts_with('\\') {
        out.push('\\');
    }
    out.push_str(&trimmed.replace('/', "\\").to_ascii_lowercase());
    out
}
