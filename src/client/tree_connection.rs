//! Caller-facing tree connection
//!
//! Every request goes through DFS resolution and, on a transport fault,
//! through reconnect-and-retry. Server statuses are never retried here.

use super::lock;
use super::locator::ResourceLocator;
use super::refcount::UsageCount;
use super::session::Session;
use super::transport::Transport;
use super::tree::Tree;
use crate::context::SmbContext;
use crate::dfs::full_path;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::{Request, RequestParams, Response, ShareType};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Attachment of a caller to a share, surviving reconnects
///
/// The connection holds one usage of its current [`Tree`]. Handles returned
/// by [`connect`](Self::connect) keep the connection itself in use.
pub struct TreeConnection {
    ctx: SmbContext,
    exclusive: bool,
    usage: UsageCount,
    tree: Mutex<Option<Arc<Tree>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl TreeConnection {
    pub fn new(ctx: SmbContext) -> Arc<Self> {
        Self::build(ctx, false)
    }

    /// Connection on a transport no one else shares
    pub fn exclusive(ctx: SmbContext) -> Arc<Self> {
        Self::build(ctx, true)
    }

    fn build(ctx: SmbContext, exclusive: bool) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            exclusive,
            usage: UsageCount::new(0),
            tree: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn context(&self) -> &SmbContext {
        &self.ctx
    }

    pub fn usage_count(&self) -> i64 {
        self.usage.get()
    }

    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        let count = self.usage.acquire();
        trace!("Acquire tree connection ({})", count);
        self.clone()
    }

    /// Drop one usage; the last one lets go of the tree
    pub fn release(&self) -> Result<()> {
        let count = self.usage.release("Tree connection")?;
        trace!("Release tree connection ({})", count);
        if count == 0 {
            if let Some(tree) = lock(&self.tree).take() {
                tree.release()?;
            }
        }
        Ok(())
    }

    /// Current tree, if any
    pub fn tree(&self) -> Option<Arc<Tree>> {
        lock(&self.tree).clone()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.tree().map(|t| t.session().clone())
    }

    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.tree().map(|t| t.session().transport().clone())
    }

    pub fn is_connected(&self) -> bool {
        self.tree().map_or(false, |t| t.is_connected())
    }

    /// Both connections ended up on the same tree, e.g. after DFS redirection
    pub fn is_same(&self, other: &TreeConnection) -> bool {
        match (self.tree(), other.tree()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    pub fn has_capability(&self, capability: u32) -> Result<bool> {
        self.tree().ok_or(Error::NotConnected)?.has_capability(capability)
    }

    pub fn is_smb2(&self) -> Result<bool> {
        Ok(self.transport().ok_or(Error::NotConnected)?.is_smb2())
    }

    pub fn share_type(&self) -> Option<ShareType> {
        self.tree().and_then(|t| t.share_type())
    }

    pub fn is_dfs(&self) -> bool {
        self.tree().map_or(false, |t| t.is_dfs())
    }

    /// Connect unless connected and hand out a handle
    pub async fn connect(self: &Arc<Self>, locator: &mut ResourceLocator) -> Result<TreeHandle> {
        self.ensure_connected(locator).await?;
        Ok(TreeHandle::new(self))
    }

    /// Connect to the locator's share unless already connected
    ///
    /// Failures other than lifecycle errors are reported as
    /// [`Error::ConnectFailed`].
    pub async fn ensure_connected(&self, locator: &mut ResourceLocator) -> Result<()> {
        let _connecting = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        match self.connect_host(locator).await {
            Ok(()) => Ok(()),
            Err(e @ (Error::Lifecycle(_) | Error::ConnectFailed { .. })) => Err(e),
            Err(e) => Err(Error::ConnectFailed {
                target: locator.server_with_dfs().to_string(),
                source: Box::new(e),
            }),
        }
    }

    async fn connect_host(&self, locator: &mut ResourceLocator) -> Result<()> {
        let ctx = &self.ctx;
        let config = ctx.config();

        if !config.dfs_disabled && !locator.is_dfs_redirected() {
            if let Some(share) = locator.share() {
                let referral = ctx
                    .dfs()
                    .resolve(ctx, locator.server(), share, locator.path())
                    .await?;
                if let Some(referral) = referral {
                    debug!(
                        "{} is redirected to \\\\{}\\{}",
                        locator, referral.server, referral.share
                    );
                    locator.set_dfs_referral(&referral);
                }
            }
        }

        let host = locator.server_with_dfs().to_string();
        let share = locator.share_with_dfs().unwrap_or("IPC$").to_string();
        let force_signing = share.eq_ignore_ascii_case("IPC$")
            && config.ipc_signing_enforced
            && !ctx.credentials().is_anonymous();

        let transport = ctx
            .pool()
            .get_transport(ctx, &host, locator.port(), self.exclusive, force_signing)
            .await?;
        let session = transport.get_smb_session(ctx, Some(&host), None).await;
        transport.release()?;
        let tree = session.get_smb_tree(&share, None);
        session.release()?;

        if let Err(e) = tree.tree_connect().await {
            tree.release()?;
            return Err(e);
        }
        self.switch_tree(Some(tree))
    }

    fn switch_tree(&self, tree: Option<Arc<Tree>>) -> Result<()> {
        let old = std::mem::replace(&mut *lock(&self.tree), tree);
        match old {
            Some(old) => old.release(),
            None => Ok(()),
        }
    }

    /// Let go of the tree
    ///
    /// With `in_error` the whole transport is hard-disconnected, otherwise
    /// only the tree is disconnected.
    pub async fn disconnect(&self, in_error: bool) -> Result<()> {
        let Some(tree) = lock(&self.tree).take() else {
            return Ok(());
        };
        let result = if in_error {
            tree.session()
                .transport()
                .disconnect(true, true)
                .await
                .map(drop)
        } else {
            tree.tree_disconnect(false, true).await.map(drop)
        };
        tree.release()?;
        result
    }

    /// Rewrite the request path through DFS
    ///
    /// Requests without a path, teardown requests and already resolved
    /// requests are left alone. A referral to another server or share moves
    /// this connection there.
    pub async fn ensure_dfs_resolved(
        &self,
        locator: &mut ResourceLocator,
        request: &mut dyn Request,
    ) -> Result<()> {
        if self.ctx.config().dfs_disabled || request.is_teardown() || request.is_resolved_in_dfs() {
            return Ok(());
        }
        let Some(path) = request.path().map(str::to_string) else {
            return Ok(());
        };
        let Some(share) = locator.share().map(str::to_string) else {
            return Ok(());
        };
        if !self.is_dfs() && !locator.is_dfs_redirected() {
            return Ok(());
        }

        let referral = self
            .ctx
            .dfs()
            .resolve(&self.ctx, locator.server(), &share, &path)
            .await?;
        let Some(referral) = referral else {
            return Ok(());
        };

        let requested = full_path(locator.server(), &share, &path);
        let resolved = referral.resolve_path(&requested);
        trace!(
            "DFS resolved {} to \\\\{}\\{}{}",
            requested,
            referral.server,
            referral.share,
            resolved
        );
        request.set_resolved_path(&referral.server, &referral.share, &resolved);

        let moved = match self.tree() {
            Some(tree) => {
                !tree.share().eq_ignore_ascii_case(&referral.share)
                    || !locator.server_with_dfs().eq_ignore_ascii_case(&referral.server)
            }
            None => true,
        };
        if moved {
            debug!(
                "Following DFS referral to \\\\{}\\{}",
                referral.server, referral.share
            );
            locator.set_dfs_referral(&referral);
            self.switch_tree(None)?;
            self.ensure_connected(locator).await?;
        }
        Ok(())
    }

    /// Send through the current tree with DFS resolution and retry
    ///
    /// A transport fault disconnects the transport, resets request and
    /// response, reconnects and tries again, up to the configured number of
    /// retries, unless `params` has [`RequestParams::NO_RETRY`].
    pub async fn send(
        &self,
        locator: &mut ResourceLocator,
        request: &mut dyn Request,
        response: &mut dyn Response,
        params: RequestParams,
    ) -> Result<()> {
        match self.send_with_retry(locator, request, response, params).await {
            Err(Error::Status(NtStatus::PATH_NOT_COVERED)) if !self.ctx.config().dfs_disabled => {
                debug!("Path not covered on {}, refreshing referral", locator);
                if let (Some(share), Some(path)) = (locator.share(), request.path()) {
                    self.ctx.dfs().invalidate(locator.server(), share, path);
                }
                request.reset();
                response.reset();
                self.send_with_retry(locator, request, response, params).await
            }
            result => result,
        }
    }

    async fn send_with_retry(
        &self,
        locator: &mut ResourceLocator,
        request: &mut dyn Request,
        response: &mut dyn Response,
        params: RequestParams,
    ) -> Result<()> {
        let max_retries = self.ctx.config().max_request_retries;
        let mut attempt = 0;
        loop {
            // a reset request has lost its DFS rewrite
            self.ensure_connected(locator).await?;
            self.ensure_dfs_resolved(locator, request).await?;
            let tree = self.tree().ok_or(Error::NotConnected)?;
            let error = match tree.send(request, response, params).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !error.is_transport_error()
                || params.contains(RequestParams::NO_RETRY)
                || attempt >= max_retries
            {
                return Err(error);
            }
            attempt += 1;
            warn!(
                "Transport error talking to {} (retry {} of {}): {}",
                locator.server_with_dfs(),
                attempt,
                max_retries,
                error
            );
            if let Err(e) = self.disconnect(true).await {
                debug!("Disconnect before retry failed: {}", e);
            }
            request.reset();
            response.reset();
        }
    }
}

impl fmt::Debug for TreeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeConnection")
            .field("tree", &self.tree())
            .field("exclusive", &self.exclusive)
            .field("usage", &self.usage.get())
            .finish()
    }
}

/// In-use guard of a [`TreeConnection`], released on drop
pub struct TreeHandle {
    connection: Arc<TreeConnection>,
}

impl TreeHandle {
    fn new(connection: &Arc<TreeConnection>) -> Self {
        Self {
            connection: connection.acquire(),
        }
    }

    pub fn connection(&self) -> &Arc<TreeConnection> {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_same(&self, other: &TreeHandle) -> bool {
        self.connection.is_same(&other.connection)
    }

    pub fn has_capability(&self, capability: u32) -> Result<bool> {
        self.connection.has_capability(capability)
    }

    pub fn tree_id(&self) -> Result<u32> {
        Ok(self.connection.tree().ok_or(Error::NotConnected)?.tree_id())
    }

    pub async fn send(
        &self,
        locator: &mut ResourceLocator,
        request: &mut dyn Request,
        response: &mut dyn Response,
        params: RequestParams,
    ) -> Result<()> {
        self.connection.send(locator, request, response, params).await
    }
}

impl Drop for TreeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.connection.release() {
            warn!("Releasing tree handle: {}", e);
        }
    }
}

impl fmt::Debug for TreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TreeHandle").field(&self.connection).finish()
    }
}
