//! Share attachment within a session

use super::lock;
use super::refcount::OwnedUsage;
use super::session::Session;
use super::transport::check_status;
use crate::error::Result;
use crate::protocol::{peek_status, Request, RequestParams, Response, ShareType};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, Default)]
struct TreeState {
    tree_id: u32,
    connected: bool,
    share_type: Option<ShareType>,
    dfs: bool,
}

/// Tree connect to one share of a [`Session`]
///
/// Created with a usage count of zero; [`Session::get_smb_tree`] hands it
/// out acquired. While in use the tree holds a usage of its session.
pub struct Tree {
    session: Arc<Session>,
    share: String,
    service: Option<String>,
    usage: OwnedUsage,
    state: Mutex<TreeState>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Tree {
    pub(crate) fn new(session: &Arc<Session>, share: &str, service: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            session: session.acquire(),
            share: share.to_string(),
            service: service.map(str::to_string),
            usage: OwnedUsage::new(0, true),
            state: Mutex::new(TreeState::default()),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Same share, case-insensitively; a service starting with `??` matches any
    pub fn matches(&self, share: &str, service: Option<&str>) -> bool {
        if !self.share.eq_ignore_ascii_case(share) {
            return false;
        }
        match service {
            None => true,
            Some(s) if s.starts_with("??") => true,
            Some(s) => self
                .service
                .as_deref()
                .map_or(false, |own| own.eq_ignore_ascii_case(s)),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn tree_id(&self) -> u32 {
        lock(&self.state).tree_id
    }

    pub fn share_type(&self) -> Option<ShareType> {
        lock(&self.state).share_type
    }

    /// Server flagged the share as a DFS namespace
    pub fn is_dfs(&self) -> bool {
        lock(&self.state).dfs
    }

    pub fn is_ipc(&self) -> bool {
        self.share.eq_ignore_ascii_case("IPC$")
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected && self.session.is_connected()
    }

    pub fn usage_count(&self) -> i64 {
        self.usage.get()
    }

    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        let count = self.usage.acquire(|| {
            self.session.acquire();
        });
        trace!("Acquire tree {} ({})", self.share, count);
        self.clone()
    }

    /// Drop one usage
    ///
    /// The last usage detaches the tree from its session, disconnects it in
    /// the background and then releases the session.
    pub fn release(self: &Arc<Self>) -> Result<()> {
        // same lock get_smb_tree hands out trees under
        let release_session = {
            let mut trees = self.session.trees();
            let (count, detached) = self.usage.release_detached("Tree")?;
            trace!("Release tree {} ({})", self.share, count);
            if count != 0 {
                return Ok(());
            }
            trees.retain(|t| !Arc::ptr_eq(t, self));
            detached
        };
        let runtime = tokio::runtime::Handle::try_current();
        match runtime {
            Ok(runtime) if self.is_connected() => {
                let tree = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = tree.tree_disconnect(false, false).await {
                        debug!("Tree disconnect of {} failed: {}", tree.share, e);
                    }
                    if release_session {
                        if let Err(e) = tree.session.release() {
                            warn!("Releasing session of tree {}: {}", tree.share, e);
                        }
                    }
                });
                Ok(())
            }
            _ => {
                self.invalidate();
                if release_session {
                    self.session.release()?;
                }
                Ok(())
            }
        }
    }

    /// Tree connect unless connected, setting up the session first
    pub async fn tree_connect(&self) -> Result<()> {
        let _connecting = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.session.session_setup().await?;

        let transport = self.session.transport();
        let host = self
            .session
            .target_host()
            .unwrap_or_else(|| transport.address().host_name());
        let unc = format!("\\\\{}\\{}", host, self.share);
        let service = self.service.as_deref().unwrap_or("?????");
        debug!("Tree connect to {}", unc);

        let codec = transport.codec();
        let mut request = codec.tree_connect_request(transport.is_smb2(), &unc, service)?;
        let exchange = self
            .session
            .exchange(request.as_mut(), 0, RequestParams::default())
            .await?;
        check_status(peek_status(&exchange.response)?)?;
        let reply = codec.parse_tree_connect(&exchange.response)?;

        *lock(&self.state) = TreeState {
            tree_id: reply.tree_id,
            connected: true,
            share_type: Some(reply.share_type),
            dfs: reply.is_dfs(),
        };
        debug!(
            "Connected tree {} as {:#x} ({:?}{})",
            unc,
            reply.tree_id,
            reply.share_type,
            if reply.is_dfs() { ", DFS" } else { "" }
        );
        Ok(())
    }

    /// Send on this tree, connecting it first
    pub async fn send(
        &self,
        request: &mut dyn Request,
        response: &mut dyn Response,
        params: RequestParams,
    ) -> Result<()> {
        self.tree_connect().await?;
        let tree_id = self.tree_id();
        self.session.send(request, response, tree_id, params).await
    }

    /// Disconnect from the share
    ///
    /// `in_error` skips the server round trip. Returns whether the tree was
    /// still in use; with `in_use` the caller's usage is not counted.
    pub async fn tree_disconnect(&self, in_error: bool, in_use: bool) -> Result<bool> {
        let usage = self.usage.get();
        let was_in_use = if in_use { usage > 1 } else { usage > 0 };
        let state = std::mem::take(&mut *lock(&self.state));
        if !state.connected {
            return Ok(was_in_use);
        }

        if !in_error && self.session.transport().is_connected() {
            let codec = self.session.transport().codec();
            let mut request = codec.tree_disconnect_request(self.session.transport().is_smb2())?;
            self.session
                .exchange(request.as_mut(), state.tree_id, RequestParams::NO_RETRY)
                .await?;
            debug!("Disconnected tree {} ({:#x})", self.share, state.tree_id);
        }
        Ok(was_in_use)
    }

    /// Forget the tree id without talking to the server
    pub(crate) fn invalidate(&self) {
        *lock(&self.state) = TreeState::default();
    }

    /// Capability of the negotiated connection
    pub fn has_capability(&self, capability: u32) -> Result<bool> {
        self.session.transport().has_capability(capability)
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *lock(&self.state);
        f.debug_struct("Tree")
            .field("share", &self.share)
            .field("service", &self.service)
            .field("tree_id", &format_args!("{:#x}", state.tree_id))
            .field("connected", &state.connected)
            .field("usage", &self.usage.get())
            .finish()
    }
}
