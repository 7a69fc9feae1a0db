//! Authenticated session on a transport

use super::lock;
use super::refcount::OwnedUsage;
use super::transport::{check_status, Exchange, MessageSecurity, Transport};
use super::tree::Tree;
use crate::auth::{Credentials, Principal};
use crate::config::ClientConfig;
use crate::context::SmbContext;
use crate::crypto::{EncryptionContext, PreauthIntegrity, SigningDigest};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::{
    peek_flags, Codec, Dialect, Request, RequestParams, Response, SecurityMode, SessionFlags,
    SessionSetupParams, Smb2Capabilities, Smb2HeaderFlags,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    NotConnected,
    SettingUp,
    Connected,
    LoggingOff,
}

#[derive(Default)]
struct SecurityState {
    session_id: u64,
    session_key: Option<Vec<u8>>,
    digest: Option<Arc<SigningDigest>>,
    encryption: Option<Arc<EncryptionContext>>,
    preauth: Option<PreauthIntegrity>,
    expiration: Option<Instant>,
}

/// One principal's session on a [`Transport`]
///
/// Starts with one usage held by the caller of
/// [`Transport::get_smb_session`]. While in use the session holds a usage of
/// its transport.
pub struct Session {
    transport: Arc<Transport>,
    config: Arc<ClientConfig>,
    codec: Arc<dyn Codec>,
    credentials: Box<dyn Credentials>,
    principal: Principal,
    target_host: Option<String>,
    target_domain: Option<String>,
    usage: OwnedUsage,
    state: Mutex<SessionState>,
    security: Mutex<SecurityState>,
    trees: Mutex<Vec<Arc<Tree>>>,
}

impl Session {
    pub(crate) fn new(
        ctx: &SmbContext,
        transport: &Arc<Transport>,
        target_host: Option<String>,
        target_domain: Option<String>,
    ) -> Arc<Self> {
        let credentials = ctx.credentials().clone_box();
        Arc::new(Self {
            transport: transport.acquire(),
            config: ctx.config().clone(),
            codec: ctx.codec().clone(),
            principal: credentials.principal(),
            credentials,
            target_host,
            target_domain,
            usage: OwnedUsage::new(1, true),
            state: Mutex::new(SessionState::NotConnected),
            security: Mutex::new(SecurityState::default()),
            trees: Mutex::new(Vec::new()),
        })
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn target_host(&self) -> Option<&str> {
        self.target_host.as_deref()
    }

    pub fn target_domain(&self) -> Option<&str> {
        self.target_domain.as_deref()
    }

    pub(crate) fn matches(
        &self,
        principal: &Principal,
        target_host: Option<&str>,
        target_domain: Option<&str>,
    ) -> bool {
        self.principal == *principal
            && self.target_host.as_deref() == target_host
            && self.target_domain.as_deref() == target_domain
    }

    /// Session id assigned by the server, zero before setup
    pub fn session_id(&self) -> u64 {
        lock(&self.security).session_id
    }

    pub fn usage_count(&self) -> i64 {
        self.usage.get()
    }

    pub fn is_in_use(&self) -> bool {
        self.usage.get() > 0
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        lock(&self.security)
            .expiration
            .map_or(false, |expiration| expiration <= now)
    }

    fn refresh_expiration(&self) {
        let expiration = self.config.session_expiry().map(|ttl| Instant::now() + ttl);
        lock(&self.security).expiration = expiration;
    }

    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        let count = self.usage.acquire(|| {
            self.transport.acquire();
        });
        trace!("Acquire session {:#x} ({})", self.session_id(), count);
        self.clone()
    }

    /// Drop one usage; the last one releases the transport
    pub fn release(&self) -> Result<()> {
        let count = self
            .usage
            .release("Session", || self.transport.release())?;
        trace!("Release session {:#x} ({})", self.session_id(), count);
        Ok(())
    }

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// A setup response with a session id was recorded and the transport is up
    pub fn is_connected(&self) -> bool {
        self.session_id() != 0
            && self.state() == SessionState::Connected
            && self.transport.is_connected()
    }

    pub fn is_failed(&self) -> bool {
        self.session_id() != 0 && self.transport.is_failed()
    }

    pub fn session_key(&self) -> Result<Vec<u8>> {
        lock(&self.security)
            .session_key
            .clone()
            .ok_or(Error::NoSessionKey)
    }

    pub fn digest(&self) -> Option<Arc<SigningDigest>> {
        lock(&self.security).digest.clone()
    }

    pub fn is_encrypted(&self) -> bool {
        lock(&self.security).encryption.is_some()
    }

    /// Final preauth hash of a 3.1.1 session setup
    pub fn preauth_hash(&self) -> Option<Vec<u8>> {
        let security = lock(&self.security);
        let preauth = security.preauth.as_ref()?;
        preauth.hash().ok().map(<[u8]>::to_vec)
    }

    /// A signing digest still has to be installed for this session
    pub fn is_signature_setup_required(&self) -> Result<bool> {
        if lock(&self.security).digest.is_some() {
            return Ok(false);
        }
        self.connection_wants_signing()
    }

    fn connection_wants_signing(&self) -> Result<bool> {
        if self.transport.is_signing_enforced() {
            return Ok(true);
        }
        Ok(self.transport.negotiation()?.signing_negotiated())
    }

    pub fn encrypt_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let (encryption, session_id) = {
            let security = lock(&self.security);
            (security.encryption.clone(), security.session_id)
        };
        encryption
            .ok_or(Error::EncryptionNotEnabled)?
            .encrypt_message(message, session_id)
    }

    pub fn decrypt_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let encryption = lock(&self.security).encryption.clone();
        encryption
            .ok_or(Error::EncryptionNotEnabled)?
            .decrypt_message(message)
    }

    fn message_security(&self, tree_id: u32) -> MessageSecurity {
        let security = lock(&self.security);
        MessageSecurity {
            session_id: security.session_id,
            tree_id,
            digest: security.digest.clone(),
            encryption: security.encryption.clone(),
        }
    }

    /// Tree for `share`, shared with other callers asking for the same share
    pub fn get_smb_tree(self: &Arc<Self>, share: &str, service: Option<&str>) -> Arc<Tree> {
        let mut trees = lock(&self.trees);
        if let Some(existing) = trees.iter().find(|t| t.matches(share, service)) {
            trace!("Reusing tree {}", share);
            return existing.acquire();
        }
        let tree = Tree::new(self, share, service);
        tree.acquire();
        trees.push(tree.clone());
        tree
    }

    /// Tree list; tree usages taken or dropped to zero change under this lock
    pub(crate) fn trees(&self) -> MutexGuard<'_, Vec<Arc<Tree>>> {
        lock(&self.trees)
    }

    pub fn num_trees(&self) -> usize {
        lock(&self.trees).len()
    }

    /// Authenticate unless already established
    ///
    /// Setup is serialized per transport so preauth hash chains never
    /// interleave.
    pub async fn session_setup(&self) -> Result<()> {
        let _setup = self.transport.setup_lock().lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.transport.ensure_connected().await?;

        self.set_state(SessionState::SettingUp);
        match self.authenticate(0).await {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.refresh_expiration();
                info!(
                    "Session {:#x} established for {}",
                    self.session_id(),
                    self.principal
                );
                Ok(())
            }
            Err(e) => {
                debug!("Session setup for {} failed: {}", self.principal, e);
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Re-run authentication for the current session id
    pub async fn reauthenticate(&self) -> Result<()> {
        let _setup = self.transport.setup_lock().lock().await;
        let session_id = self.session_id();
        if session_id == 0 {
            return Err(Error::InvalidState(
                "Session was never established".to_string(),
            ));
        }
        debug!("Reauthenticating session {:#x}", session_id);
        self.authenticate(session_id).await?;
        self.set_state(SessionState::Connected);
        self.refresh_expiration();
        Ok(())
    }

    async fn authenticate(&self, existing_id: u64) -> Result<()> {
        let transport = &self.transport;
        let negotiation = transport.negotiation()?;
        let smb2 = transport.is_smb2();
        let dialect = negotiation.dialect()?;
        let host = self
            .target_host
            .clone()
            .unwrap_or_else(|| transport.address().host_name().to_string());

        let mut anonymous = self.credentials.is_anonymous();
        let security_mode = if transport.is_signing_enforced() {
            SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
        } else {
            SecurityMode::SIGNING_ENABLED
        };
        let mut preauth = if smb2 && dialect == Dialect::Smb311 {
            Some(PreauthIntegrity::new(
                transport.preauth_algorithm()?,
                transport.preauth_integrity_hash()?,
            ))
        } else {
            None
        };

        let mut context = self.credentials.create_context(
            &host,
            self.target_domain.as_deref(),
            negotiation.security_blob(),
            !anonymous,
        )?;
        let mut token = negotiation.security_blob().to_vec();
        let mut session_id = existing_id;
        let mut session_flags = SessionFlags::empty();
        let mut last_response: Option<Vec<u8>> = None;

        loop {
            let Some(out) = context.init_sec_context(&token)? else {
                return Err(Error::Authentication(
                    "Authentication context stopped before completion".to_string(),
                ));
            };
            let mut request = self.codec.session_setup_request(
                smb2,
                &SessionSetupParams {
                    session_id,
                    security_mode,
                    capabilities: self.config.capabilities & Smb2Capabilities::DFS,
                    token: out,
                },
            )?;
            let security = MessageSecurity {
                session_id,
                ..Default::default()
            };
            let Exchange { request, response } = transport
                .exchange(request.as_mut(), &security, RequestParams::NO_RETRY)
                .await?;
            let reply = self.codec.parse_session_setup(&response)?;

            if let Some(preauth) = preauth.as_mut() {
                preauth.update(&request)?;
                if reply.status == NtStatus::MORE_PROCESSING_REQUIRED {
                    preauth.update(&response)?;
                }
            }
            if reply.status != NtStatus::SUCCESS
                && reply.status != NtStatus::MORE_PROCESSING_REQUIRED
            {
                return Err(Error::Status(reply.status));
            }
            if existing_id != 0 && reply.session_id != existing_id {
                return Err(Error::Authentication(
                    "Server assigned a new session id on reauthentication".to_string(),
                ));
            }

            session_id = reply.session_id;
            lock(&self.security).session_id = session_id;
            if let Some(preauth) = preauth.as_mut() {
                preauth.set_session_id(session_id);
            }

            if reply.flags.contains(SessionFlags::IS_GUEST) {
                if !self.config.allow_guest_fallback
                    && !(self.credentials.is_guest() || self.credentials.is_anonymous())
                {
                    return Err(Error::Status(NtStatus::LOGON_FAILURE));
                }
                if !anonymous {
                    debug!("Logged in as guest, not signing");
                    anonymous = true;
                }
            }

            session_flags = reply.flags;
            token = reply.token;
            last_response = Some(response);
            if reply.status == NtStatus::SUCCESS {
                if !context.is_established() {
                    // final server token still has to be consumed
                    context.init_sec_context(&token)?;
                }
                break;
            }
            if context.is_established() {
                return Err(Error::Authentication(
                    "Server asked for more processing after authentication completed"
                        .to_string(),
                ));
            }
        }

        let session_key = context.signing_key().map(|mut key| {
            key.resize(16, 0);
            key
        });
        let mut security = SecurityState {
            session_id,
            expiration: None,
            ..Default::default()
        };

        if smb2 {
            let preauth_hash = match preauth.as_ref() {
                Some(p) => Some(p.hash()?.to_vec()),
                None => None,
            };
            match session_key.as_deref() {
                Some(key) => {
                    let response_signed = last_response
                        .as_deref()
                        .and_then(|r| peek_flags(r).ok())
                        .map_or(false, |f| f.contains(Smb2HeaderFlags::SIGNED));
                    if !anonymous && (self.connection_wants_signing()? || response_signed) {
                        let digest = SigningDigest::new(key, dialect, preauth_hash.as_deref())?;
                        if dialect.at_least(Dialect::Smb300) || response_signed {
                            if let Some(last) = last_response.as_deref() {
                                digest.verify(last)?;
                            }
                        }
                        debug!("Signing enabled for session {:#x}", session_id);
                        security.digest = Some(Arc::new(digest));
                    } else if self.config.signing_enforced && !anonymous {
                        return Err(Error::Authentication(
                            "Signing enforced but no session key available".to_string(),
                        ));
                    }

                    let server_requires = session_flags.contains(SessionFlags::ENCRYPT_DATA);
                    let client_requests = self.config.encryption_enabled
                        && negotiation.has_capability(Smb2Capabilities::ENCRYPTION.bits());
                    if server_requires || (client_requests && dialect.is_smb3()) {
                        let encryption =
                            transport.create_encryption_context(key, preauth_hash.as_deref())?;
                        debug!("Encryption enabled for session {:#x}", session_id);
                        security.encryption = Some(Arc::new(encryption));
                    }
                }
                None if session_flags.contains(SessionFlags::ENCRYPT_DATA) => {
                    return Err(Error::NoSessionKey);
                }
                None if self.config.signing_enforced && !anonymous => {
                    return Err(Error::Authentication(
                        "Signing enforced but no session key available".to_string(),
                    ));
                }
                None => {}
            }
        }

        security.session_key = session_key;
        security.preauth = preauth;
        let mut current = lock(&self.security);
        if existing_id != 0 {
            // a reauthentication never weakens the session
            if security.digest.is_none() {
                security.digest = current.digest.take();
            }
            if security.encryption.is_none() {
                security.encryption = current.encryption.take();
            }
        }
        *current = security;
        Ok(())
    }

    /// Send on this session, setting it up first
    ///
    /// An expired session is reauthenticated and the request sent once more.
    /// A session the server deleted takes the transport down and surfaces as
    /// a transport error so the tree layer reconnects.
    pub async fn send(
        &self,
        request: &mut dyn Request,
        response: &mut dyn Response,
        tree_id: u32,
        params: RequestParams,
    ) -> Result<()> {
        self.session_setup().await?;
        let result = self.send_raw(request, response, tree_id, params).await;
        let result = match result {
            Err(Error::Status(NtStatus::NETWORK_SESSION_EXPIRED)) => {
                self.reauthenticate().await?;
                request.reset();
                response.reset();
                self.send_raw(request, response, tree_id, params).await
            }
            Err(Error::Status(NtStatus::USER_SESSION_DELETED)) => {
                let session_id = self.session_id();
                warn!("Server deleted session {:#x}", session_id);
                self.transport.disconnect(true, true).await?;
                Err(Error::Transport(format!(
                    "Session {:#x} was deleted by the server",
                    session_id
                )))
            }
            other => other,
        };
        if result.is_ok() {
            self.refresh_expiration();
        }
        result
    }

    /// Send with this session's signing and encryption, no recovery
    pub(crate) async fn send_raw(
        &self,
        request: &mut dyn Request,
        response: &mut dyn Response,
        tree_id: u32,
        params: RequestParams,
    ) -> Result<()> {
        let exchange = self.exchange(request, tree_id, params).await?;
        response.decode(&exchange.response)?;
        check_status(response.status())
    }

    pub(crate) async fn exchange(
        &self,
        request: &mut dyn Request,
        tree_id: u32,
        params: RequestParams,
    ) -> Result<Exchange> {
        let security = self.message_security(tree_id);
        self.transport.exchange(request, &security, params).await
    }

    /// Disconnect trees and log off
    ///
    /// `in_error` skips all server round trips. Returns whether the session
    /// was still in use; with `in_use` the caller's usage is not counted.
    pub async fn logoff(&self, in_error: bool, in_use: bool) -> Result<bool> {
        let usage = self.usage.get();
        let mut was_in_use = if in_use { usage > 1 } else { usage > 0 };
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Connected {
                return Ok(was_in_use);
            }
            *state = SessionState::LoggingOff;
        }

        let trees: Vec<_> = lock(&self.trees).drain(..).collect();
        for tree in &trees {
            match tree.tree_disconnect(in_error, false).await {
                Ok(used) => was_in_use |= used,
                Err(e) => debug!("Tree disconnect during logoff failed: {}", e),
            }
        }

        if !in_error && self.transport.is_connected() {
            let session_id = self.session_id();
            let result: Result<()> = async {
                let mut request = self.codec.logoff_request(self.transport.is_smb2())?;
                self.exchange(request.as_mut(), 0, RequestParams::NO_RETRY)
                    .await
                    .map(drop)
            }
            .await;
            match result {
                Ok(()) => debug!("Logged off session {:#x}", session_id),
                Err(e) => debug!("Logoff of session {:#x} failed: {}", session_id, e),
            }
        }

        *lock(&self.security) = SecurityState::default();
        self.set_state(SessionState::NotConnected);
        Ok(was_in_use)
    }

    /// Forget all server state without talking to the server
    pub(crate) fn invalidate(&self) {
        let trees: Vec<_> = lock(&self.trees).drain(..).collect();
        for tree in &trees {
            tree.invalidate();
        }
        *lock(&self.security) = SecurityState::default();
        self.set_state(SessionState::NotConnected);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &format_args!("{:#x}", self.session_id()))
            .field("principal", &self.principal)
            .field("target_host", &self.target_host)
            .field("usage", &self.usage.get())
            .finish_non_exhaustive()
    }
}
