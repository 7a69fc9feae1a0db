//! One physical connection and its negotiated protocol state

use super::lock;
use super::pool::TransportPool;
use super::refcount::UsageCount;
use super::session::Session;
use crate::config::{ClientConfig, DEFAULT_PORT, NETBIOS_PORT};
use crate::context::SmbContext;
use crate::crypto::{EncryptionContext, PreauthHashAlgorithm, SigningDigest};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::{
    is_interim_response, is_smb2_message, is_transform_message, CipherId, Codec, Dialect,
    HashAlgorithmId, NegotiateParams, Negotiation, Request, RequestHeader, RequestParams,
    Response, SecurityMode, Smb2HeaderFlags,
};
use crate::resolver::Address;
use crate::transport::{Channel, Connector};
use byteorder::{ByteOrder, LittleEndian};
use rand::RngCore;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    /// Connect or negotiation failed
    Failed,
}

/// Per-message security applied by [`Transport::exchange`]
#[derive(Debug, Clone, Default)]
pub struct MessageSecurity {
    pub session_id: u64,
    pub tree_id: u32,
    pub digest: Option<Arc<SigningDigest>>,
    pub encryption: Option<Arc<EncryptionContext>>,
}

/// Raw bytes of one request/response pair as they were signed and verified
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

/// Connection to one `(address, port)`
///
/// Created by the [`TransportPool`] with a usage count of one held by the
/// caller. Sessions acquire the transport while they are in use.
pub struct Transport {
    id: u64,
    address: Address,
    port: Mutex<u16>,
    config: Arc<ClientConfig>,
    codec: Arc<dyn Codec>,
    connector: Arc<dyn Connector>,
    pool: Weak<TransportPool>,
    signing_enforced: bool,
    smb2_requested: bool,
    state: Mutex<TransportState>,
    usage: UsageCount,
    message_id: AtomicU64,
    negotiation: Mutex<Option<Arc<Negotiation>>>,
    preauth_hash: Mutex<Option<Vec<u8>>>,
    sessions: Mutex<Vec<Arc<Session>>>,
    channel: tokio::sync::Mutex<Option<Box<dyn Channel>>>,
    channel_closed: AtomicBool,
    disconnecting: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
    setup_lock: tokio::sync::Mutex<()>,
}

impl Transport {
    pub(crate) fn new(
        ctx: &SmbContext,
        address: Address,
        port: u16,
        signing_enforced: bool,
        pool: Weak<TransportPool>,
    ) -> Arc<Self> {
        let config = ctx.config().clone();
        let port = if port == 0 { DEFAULT_PORT } else { port };
        Arc::new(Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            address,
            port: Mutex::new(port),
            smb2_requested: !config.offers_smb1(),
            config,
            codec: ctx.codec().clone(),
            connector: ctx.connector().clone(),
            pool,
            signing_enforced,
            state: Mutex::new(TransportState::NotConnected),
            usage: UsageCount::new(1),
            message_id: AtomicU64::new(0),
            negotiation: Mutex::new(None),
            preauth_hash: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
            channel: tokio::sync::Mutex::new(None),
            channel_closed: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
            setup_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Port in use; switches to 139 after a failover
    pub fn port(&self) -> u16 {
        *lock(&self.port)
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub(crate) fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Whether this transport serves `(address, port)`
    ///
    /// A transport that fell back to 139 still serves requests for 445.
    pub fn matches(&self, address: &Address, port: u16) -> bool {
        let port = if port == 0 { DEFAULT_PORT } else { port };
        let own = self.port();
        self.address.ip() == address.ip()
            && (own == port || (own == NETBIOS_PORT && port == DEFAULT_PORT))
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    fn set_state(&self, state: TransportState) {
        *lock(&self.state) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected && !self.channel_closed.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state(),
            TransportState::Disconnecting | TransportState::Disconnected
        )
    }

    /// Connect failed, or the socket closed while the state claims connected
    pub fn is_failed(&self) -> bool {
        match self.state() {
            TransportState::Failed => true,
            TransportState::Connected => self.channel_closed.load(Ordering::SeqCst),
            _ => false,
        }
    }

    pub fn usage_count(&self) -> i64 {
        self.usage.get()
    }

    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        let count = self.usage.acquire();
        trace!("Acquire transport {} ({})", self.id, count);
        self.clone()
    }

    /// Drop one usage; an unused transport disconnects after the idle timeout
    pub fn release(self: &Arc<Self>) -> Result<()> {
        let count = self.usage.release("Transport")?;
        trace!("Release transport {} ({})", self.id, count);
        if count == 0 {
            self.schedule_idle_disconnect();
        }
        Ok(())
    }

    fn schedule_idle_disconnect(self: &Arc<Self>) {
        let idle = self.config.so_timeout;
        if idle.is_zero() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::time::sleep(idle).await;
            let Some(transport) = transport.upgrade() else {
                return;
            };
            if transport.usage_count() == 0 && !transport.is_disconnected() {
                debug!("Disconnecting idle transport {}", transport.id);
                if let Err(e) = transport.disconnect(false, false).await {
                    debug!("Idle disconnect of transport {} failed: {}", transport.id, e);
                }
            }
        });
    }

    /// Negotiation outcome
    pub fn negotiation(&self) -> Result<Arc<Negotiation>> {
        lock(&self.negotiation).clone().ok_or(Error::NotConnected)
    }

    pub fn is_negotiated(&self) -> bool {
        lock(&self.negotiation).is_some()
    }

    pub fn dialect(&self) -> Result<Dialect> {
        self.negotiation()?.dialect()
    }

    pub fn has_capability(&self, capability: u32) -> Result<bool> {
        Ok(self.negotiation()?.has_capability(capability))
    }

    /// SMB2 was requested up front or negotiated
    pub fn is_smb2(&self) -> bool {
        match lock(&self.negotiation).as_deref() {
            Some(negotiation) => negotiation.is_smb2(),
            None => self.smb2_requested,
        }
    }

    /// Signing was forced at construction or the server requires it
    pub fn is_signing_enforced(&self) -> bool {
        self.signing_enforced
            || lock(&self.negotiation)
                .as_deref()
                .map_or(false, Negotiation::signing_required)
    }

    pub fn is_signing_optional(&self) -> bool {
        if self.signing_enforced {
            return false;
        }
        lock(&self.negotiation)
            .as_deref()
            .map_or(false, |n| n.signing_negotiated() && !n.signing_required())
    }

    /// Transport was built for a caller that forced signing
    pub(crate) fn is_signing_forced(&self) -> bool {
        self.signing_enforced
    }

    /// Security mode for the next negotiate request
    ///
    /// Never proposes weaker signing than the transport will enforce, or than
    /// a previous response from the server already required.
    pub fn request_security_mode(&self, previous: Option<&Negotiation>) -> SecurityMode {
        if self.is_signing_enforced() || previous.map_or(false, Negotiation::signing_required) {
            SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
        } else {
            SecurityMode::SIGNING_ENABLED
        }
    }

    /// Legacy SMB1 encryption key; SMB2 and later derive keys instead
    pub fn server_encryption_key(&self) -> Option<Vec<u8>> {
        let negotiation = lock(&self.negotiation).clone()?;
        match negotiation.encryption_key() {
            Ok(key) => key.map(<[u8]>::to_vec),
            Err(_) => None,
        }
    }

    /// Another caller with `ctx` may share this transport
    pub fn can_reuse(&self, ctx: &SmbContext, force_signing: bool) -> bool {
        if *self.config != **ctx.config() {
            return false;
        }
        match lock(&self.negotiation).as_deref() {
            Some(negotiation) => negotiation.can_reuse(force_signing),
            None => true,
        }
    }

    fn negotiated_311(&self) -> Result<Arc<Negotiation>> {
        if !self.is_smb2() {
            return Err(Error::Unsupported(
                "Preauth integrity requires SMB2".to_string(),
            ));
        }
        let negotiation = lock(&self.negotiation).clone().ok_or_else(|| {
            Error::Unsupported("Transport has not negotiated".to_string())
        })?;
        if negotiation.dialect()? != Dialect::Smb311 {
            return Err(Error::Unsupported(
                "Preauth integrity is only used with SMB 3.1.1".to_string(),
            ));
        }
        Ok(negotiation)
    }

    /// Hash algorithm selected for SMB 3.1.1 preauth integrity
    pub fn preauth_algorithm(&self) -> Result<PreauthHashAlgorithm> {
        self.negotiated_311()?
            .preauth_hash_algorithm()?
            .map(PreauthHashAlgorithm::from)
            .ok_or_else(|| Error::Unsupported("No preauth hash algorithm negotiated".to_string()))
    }

    /// `Hash(prior ‖ message)`, starting from zeros when `prior` is absent
    pub fn calculate_preauth_hash(&self, message: &[u8], prior: Option<&[u8]>) -> Result<Vec<u8>> {
        let algorithm = self.preauth_algorithm()?;
        Ok(match prior {
            Some(prior) => algorithm.chain(prior, message),
            None => algorithm.chain(&algorithm.initial(), message),
        })
    }

    /// Connection preauth hash after negotiation
    pub fn preauth_integrity_hash(&self) -> Result<Vec<u8>> {
        self.negotiated_311()?;
        lock(&self.preauth_hash)
            .clone()
            .ok_or_else(|| Error::Integrity("Negotiation was not hashed".to_string()))
    }

    /// Encryption context for a session of this connection
    ///
    /// SMB 3.0.x uses AES-128-CCM; 3.1.1 uses the server's cipher, AES-128-GCM
    /// when the server named none.
    pub fn create_encryption_context(
        &self,
        session_key: &[u8],
        preauth_hash: Option<&[u8]>,
    ) -> Result<EncryptionContext> {
        let negotiation = lock(&self.negotiation).clone().ok_or_else(|| {
            Error::Unsupported("Transport has not negotiated".to_string())
        })?;
        let dialect = negotiation.dialect()?;
        let cipher = match dialect {
            Dialect::Smb311 => negotiation.cipher()?.unwrap_or(CipherId::Aes128Gcm),
            Dialect::Smb300 | Dialect::Smb302 => CipherId::Aes128Ccm,
            older => {
                return Err(Error::Unsupported(format!(
                    "Encryption is not supported by {}",
                    older
                )))
            }
        };
        debug!("Transport {} encrypting with {:?} ({})", self.id, cipher, dialect);
        EncryptionContext::new(dialect, cipher, session_key, preauth_hash)
    }

    pub(crate) fn setup_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.setup_lock
    }

    pub fn num_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Session for the context's principal on `target_host`/`target_domain`
    ///
    /// Reuses a matching session; otherwise logs off expired unused sessions
    /// and registers a new one.
    pub async fn get_smb_session(
        self: &Arc<Self>,
        ctx: &SmbContext,
        target_host: Option<&str>,
        target_domain: Option<&str>,
    ) -> Arc<Session> {
        let host = target_host.map(str::to_ascii_lowercase);
        let domain = target_domain.map(str::to_ascii_uppercase);
        let principal = ctx.credentials().principal();

        let (session, expired) = {
            let mut sessions = lock(&self.sessions);
            if let Some(existing) = sessions
                .iter()
                .find(|s| s.matches(&principal, host.as_deref(), domain.as_deref()))
            {
                trace!("Reusing session for {} on transport {}", principal, self.id);
                return existing.acquire();
            }

            let now = Instant::now();
            let mut expired = Vec::new();
            sessions.retain(|s| {
                if s.is_expired(now) && !s.is_in_use() {
                    expired.push(s.clone());
                    false
                } else {
                    true
                }
            });

            let session = Session::new(ctx, self, host, domain);
            sessions.push(session.clone());
            (session, expired)
        };

        for stale in expired {
            debug!("Logging off expired session {:#x}", stale.session_id());
            if let Err(e) = stale.logoff(false, false).await {
                debug!("Logoff of expired session failed: {}", e);
            }
        }
        debug!("New session for {} on transport {}", principal, self.id);
        session
    }

    /// Connect and negotiate unless already connected
    ///
    /// Returns whether a connection was made. A transport that failed or was
    /// disconnected never reconnects; callers get a new one from the pool.
    pub async fn ensure_connected(&self) -> Result<bool> {
        let _connecting = self.connect_lock.lock().await;
        match self.state() {
            TransportState::Connected if !self.channel_closed.load(Ordering::SeqCst) => {
                return Ok(false)
            }
            TransportState::NotConnected => {}
            state => {
                return Err(Error::Transport(format!(
                    "Transport {} to {} is {:?}",
                    self.id, self.address, state
                )))
            }
        }

        self.set_state(TransportState::Connecting);
        match self.connect().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                info!(
                    "Connected to {}:{} ({})",
                    self.address,
                    self.port(),
                    self.dialect().map(|d| d.to_string()).unwrap_or_default()
                );
                Ok(true)
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", self.address, e);
                self.set_state(TransportState::Failed);
                self.channel_closed.store(true, Ordering::SeqCst);
                *self.channel.lock().await = None;
                self.remove_from_pool();
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        let port = self.port();
        match self.connect_on(port).await {
            Err(e) if port == DEFAULT_PORT && self.config.port139_failover => {
                debug!(
                    "Port {} on {} failed ({}), trying {}",
                    port, self.address, e, NETBIOS_PORT
                );
                *lock(&self.port) = NETBIOS_PORT;
                self.connect_on(NETBIOS_PORT).await
            }
            result => result,
        }
    }

    async fn connect_on(&self, port: u16) -> Result<()> {
        let mut channel = timeout(
            self.config.conn_timeout,
            self.connector.connect(&self.address, port, &self.config),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        let negotiation = self.negotiate(channel.as_mut()).await;
        match negotiation {
            Ok(()) => {
                self.channel_closed.store(false, Ordering::SeqCst);
                *self.channel.lock().await = Some(channel);
                Ok(())
            }
            Err(e) => {
                let _ = channel.close().await;
                Err(e)
            }
        }
    }

    async fn negotiate(&self, channel: &mut dyn Channel) -> Result<()> {
        let mut previous = None;
        if !self.smb2_requested {
            let params = self.negotiate_params(false, None);
            let (_, _, negotiation) = self.negotiate_round(channel, &params).await?;
            if !matches!(&negotiation, Negotiation::Smb2(n) if n.is_wildcard()) {
                negotiation.validate(&self.config)?;
                *lock(&self.negotiation) = Some(Arc::new(negotiation));
                return Ok(());
            }
            trace!("Server answered with the SMB2 wildcard");
            previous = Some(negotiation);
        }

        let params = self.negotiate_params(true, previous.as_ref());
        let (request, response, negotiation) = self.negotiate_round(channel, &params).await?;
        negotiation.validate(&self.config)?;

        if negotiation.dialect()? == Dialect::Smb311 {
            let algorithm = negotiation
                .preauth_hash_algorithm()?
                .map(PreauthHashAlgorithm::from)
                .ok_or_else(|| Error::Integrity("No preauth hash algorithm".to_string()))?;
            let hash = algorithm.chain(&algorithm.initial(), &request);
            *lock(&self.preauth_hash) = Some(algorithm.chain(&hash, &response));
        }
        *lock(&self.negotiation) = Some(Arc::new(negotiation));
        Ok(())
    }

    async fn negotiate_round(
        &self,
        channel: &mut dyn Channel,
        params: &NegotiateParams,
    ) -> Result<(Vec<u8>, Vec<u8>, Negotiation)> {
        let mut request = self.codec.negotiate_request(params)?;
        let header = RequestHeader {
            message_id: self.next_message_id(),
            ..Default::default()
        };
        let raw = request.encode(&header)?;
        let response = timeout(self.config.response_timeout, async {
            channel.send(&raw).await?;
            channel.receive().await
        })
        .await
        .map_err(|_| Error::Timeout)??;
        let negotiation = self.codec.parse_negotiate(&response)?;
        Ok((raw, response, negotiation))
    }

    fn negotiate_params(&self, smb2_only: bool, previous: Option<&Negotiation>) -> NegotiateParams {
        let mut dialects = Dialect::smb2_range(self.config.min_dialect, self.config.max_dialect);
        if !smb2_only {
            dialects.insert(0, Dialect::Smb1);
        }
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        NegotiateParams {
            smb2_only,
            dialects,
            security_mode: self.request_security_mode(previous),
            capabilities: self.config.capabilities,
            client_guid: self.config.client_guid,
            salt,
            hash_algorithms: vec![HashAlgorithmId::Sha512],
            ciphers: vec![
                CipherId::Aes128Gcm,
                CipherId::Aes128Ccm,
                CipherId::Aes256Gcm,
                CipherId::Aes256Ccm,
            ],
        }
    }

    fn next_message_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send `request` and return the raw request and response
    ///
    /// Signs and encrypts according to `security`, skips interim responses and
    /// verifies the response signature. A transport fault hard-disconnects
    /// the transport and removes it from the pool.
    pub async fn exchange(
        &self,
        request: &mut dyn Request,
        security: &MessageSecurity,
        params: RequestParams,
    ) -> Result<Exchange> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "Transport {} is not connected ({:?})",
                self.id,
                self.state()
            )));
        }
        let deadline = if params.contains(RequestParams::NO_TIMEOUT) {
            None
        } else {
            Some(request.override_timeout().unwrap_or(self.config.response_timeout))
        };

        let mut channel = self.channel.lock().await;
        let result = match channel.as_mut() {
            Some(channel) => self.round_trip(channel.as_mut(), request, security, deadline).await,
            None => Err(Error::Transport(format!("Transport {} has no channel", self.id))),
        };

        if let Err(e) = &result {
            if e.is_transport_error() {
                warn!("Transport {} to {} failed: {}", self.id, self.address, e);
                channel.take();
                drop(channel);
                self.abort();
            }
        }
        result
    }

    async fn round_trip(
        &self,
        channel: &mut dyn Channel,
        request: &mut dyn Request,
        security: &MessageSecurity,
        deadline: Option<Duration>,
    ) -> Result<Exchange> {
        let message_id = self.next_message_id();
        let header = RequestHeader {
            message_id,
            session_id: security.session_id,
            tree_id: security.tree_id,
        };
        let mut raw = request.encode(&header)?;
        if let Some(digest) = &security.digest {
            digest.sign(&mut raw)?;
        }
        let wire = match &security.encryption {
            Some(encryption) => encryption.encrypt_message(&raw, security.session_id)?,
            None => raw.clone(),
        };

        let io = async {
            channel.send(&wire).await?;
            loop {
                let mut response = channel.receive().await?;
                let encrypted = is_transform_message(&response);
                if encrypted {
                    let encryption = security.encryption.as_ref().ok_or_else(|| {
                        Error::Protocol("Encrypted response without encryption context".to_string())
                    })?;
                    response = encryption.decrypt_message(&response)?;
                }
                if is_smb2_message(&response) && response.len() >= 32 {
                    let id = LittleEndian::read_u64(&response[24..32]);
                    if id != message_id {
                        trace!("Skipping response for message {}", id);
                        continue;
                    }
                }
                if is_interim_response(&response) {
                    trace!("Interim response for message {}", message_id);
                    continue;
                }
                return Ok::<_, Error>((response, encrypted));
            }
        };
        let (response, encrypted) = match deadline {
            Some(deadline) => timeout(deadline, io).await.map_err(|_| Error::Timeout)??,
            None => io.await?,
        };

        if let Some(digest) = &security.digest {
            if !encrypted && is_smb2_message(&response) {
                verify_signed(digest, &response)?;
            }
        }
        Ok(Exchange {
            request: raw,
            response,
        })
    }

    /// [`exchange`](Self::exchange) and decode into `response`, raising error statuses
    ///
    /// CANCELLED is an empty result rather than an error.
    pub async fn send(
        &self,
        request: &mut dyn Request,
        response: &mut dyn Response,
        security: &MessageSecurity,
        params: RequestParams,
    ) -> Result<()> {
        let exchange = self.exchange(request, security, params).await?;
        response.decode(&exchange.response)?;
        check_status(response.status())
    }

    /// Drop the connection without talking to the server
    fn abort(&self) {
        self.channel_closed.store(true, Ordering::SeqCst);
        if self.disconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<_> = lock(&self.sessions).drain(..).collect();
        for session in &sessions {
            session.invalidate();
        }
        self.set_state(TransportState::Disconnected);
        self.remove_from_pool();
    }

    /// Close the connection, logging off sessions unless `hard`
    ///
    /// Returns whether the transport was still in use. With `in_use` the
    /// caller's own reference is not counted. Idempotent.
    pub async fn disconnect(&self, hard: bool, in_use: bool) -> Result<bool> {
        let usage = self.usage.get();
        let was_in_use = if in_use { usage > 1 } else { usage > 0 };
        if self.disconnecting.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let graceful = !hard && self.is_connected();
        let sessions: Vec<_> = lock(&self.sessions).drain(..).collect();
        for session in &sessions {
            if graceful {
                if let Err(e) = session.logoff(false, false).await {
                    debug!("Logoff during disconnect failed: {}", e);
                }
            } else {
                session.invalidate();
            }
        }

        self.set_state(TransportState::Disconnecting);
        let channel = self.channel.lock().await.take();
        if let Some(mut channel) = channel {
            if !hard {
                if let Err(e) = channel.close().await {
                    debug!("Closing channel of transport {} failed: {}", self.id, e);
                }
            }
        }
        self.channel_closed.store(true, Ordering::SeqCst);
        self.set_state(TransportState::Disconnected);
        self.remove_from_pool();

        debug!(
            "Disconnected transport {} from {} (hard={}, in use={})",
            self.id, self.address, hard, was_in_use
        );
        Ok(was_in_use)
    }

    fn remove_from_pool(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.remove_transport(self);
        }
    }

    #[cfg(test)]
    pub(crate) fn install_negotiation(&self, negotiation: Negotiation) {
        *lock(&self.negotiation) = Some(Arc::new(negotiation));
    }
}

/// Error statuses become [`Error::Status`]; CANCELLED and warnings pass
pub(crate) fn check_status(status: NtStatus) -> Result<()> {
    if status.is_error() && status != NtStatus::CANCELLED {
        Err(Error::Status(status))
    } else {
        Ok(())
    }
}

fn verify_signed(digest: &SigningDigest, response: &[u8]) -> Result<()> {
    let flags = crate::protocol::peek_flags(response)?;
    if !flags.contains(Smb2HeaderFlags::SIGNED) {
        return Err(Error::SigningError(
            "Server did not sign a response on a signed session".to_string(),
        ));
    }
    digest.verify(response)
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("port", &self.port())
            .field("state", &self.state())
            .field("usage", &self.usage.get())
            .finish_non_exhaustive()
    }
}
