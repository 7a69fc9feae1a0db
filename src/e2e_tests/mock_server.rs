//! Scripted in-process SMB2 server
//!
//! [`MockServer`] is a [`Connector`]: every connect opens a [`MockChannel`]
//! that answers the [`MockCodec`](super::MockCodec) layout synchronously. It
//! computes preauth hashes, signs and encrypts like a real server so the
//! client's security checks run for real. Faults can be queued for the
//! next non-core request.

use crate::auth::{AuthContext, Credentials, Principal};
use crate::config::ClientConfig;
use crate::crypto::{EncryptionContext, PreauthHashAlgorithm, SigningDigest};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::{
    is_transform_message, CipherId, Dialect, SecurityMode, SessionFlags, ShareFlags, ShareType,
    Smb2Capabilities, Smb2Command, Smb2Header, Smb2HeaderFlags,
};
use crate::resolver::{Address, NameResolver};
use crate::transport::{Channel, Connector};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const WILDCARD_REVISION: u16 = 0x02FF;

/// How the server behaves
#[derive(Debug, Clone)]
pub struct ServerScript {
    pub dialect: Dialect,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    /// Cipher named in a 3.1.1 negotiate response
    pub cipher: Option<CipherId>,
    /// Answer a multi-protocol negotiate with the SMB2 wildcard
    pub wildcard: bool,
    /// Key shared with [`TestCredentials`]; the server signs when set
    pub session_key: Option<Vec<u8>>,
    /// Session setup rounds, the last one succeeds
    pub auth_rounds: usize,
    pub guest: bool,
    pub encrypt_data: bool,
    /// Shares flagged as DFS in tree connect responses
    pub dfs_shares: Vec<String>,
    /// Shares answered with BAD_NETWORK_NAME
    pub missing_shares: Vec<String>,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            dialect: Dialect::Smb302,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::DFS | Smb2Capabilities::ENCRYPTION,
            cipher: None,
            wildcard: false,
            session_key: None,
            auth_rounds: 2,
            guest: false,
            encrypt_data: false,
            dfs_shares: Vec::new(),
            missing_shares: Vec::new(),
        }
    }
}

/// One-shot misbehavior for the next non-core request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reset the connection
    Drop,
    /// Answer with this status
    Status(NtStatus),
    /// Send an interim PENDING response first
    Interim,
    /// Send a response for another message id first
    Stray,
}

/// Request as the server saw it
#[derive(Debug, Clone)]
pub struct Received {
    pub address: IpAddr,
    pub port: u16,
    pub command: Smb2Command,
    pub session_id: u64,
    pub tree_id: u32,
    /// Share the tree id belongs to on that connection
    pub share: Option<String>,
    pub signed: bool,
    pub encrypted: bool,
    pub body: Vec<u8>,
}

impl Received {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct ServerState {
    script: Mutex<ServerScript>,
    faults: Mutex<VecDeque<Fault>>,
    refused: Mutex<HashSet<IpAddr>>,
    refused_ports: Mutex<HashSet<u16>>,
    connects: Mutex<Vec<(IpAddr, u16)>>,
    received: Mutex<Vec<Received>>,
    next_session_id: AtomicU64,
    next_tree_id: AtomicU32,
}

/// Handle to the shared server state
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn new(script: ServerScript) -> Self {
        let server = Self::default();
        *server.state.script.lock().unwrap() = script;
        server.state.next_session_id.store(0x1000, Ordering::SeqCst);
        server.state.next_tree_id.store(1, Ordering::SeqCst);
        server
    }

    pub fn script(&self) -> ServerScript {
        self.state.script.lock().unwrap().clone()
    }

    pub fn update_script(&self, f: impl FnOnce(&mut ServerScript)) {
        f(&mut self.state.script.lock().unwrap());
    }

    pub fn push_fault(&self, fault: Fault) {
        self.state.faults.lock().unwrap().push_back(fault);
    }

    /// Refuse TCP connects to `ip`
    pub fn refuse(&self, ip: IpAddr) {
        self.state.refused.lock().unwrap().insert(ip);
    }

    pub fn refuse_port(&self, port: u16) {
        self.state.refused_ports.lock().unwrap().insert(port);
    }

    /// Every connect attempt, refused ones included
    pub fn connects(&self) -> Vec<(IpAddr, u16)> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn count(&self, command: Smb2Command) -> usize {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.command == command)
            .count()
    }

    /// Requests other than the ones the connection core originates
    pub fn requests(&self) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| !is_core_command(r.command))
            .collect()
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn connect(
        &self,
        address: &Address,
        port: u16,
        _config: &ClientConfig,
    ) -> Result<Box<dyn Channel>> {
        self.state.connects.lock().unwrap().push((address.ip(), port));
        if self.state.refused.lock().unwrap().contains(&address.ip())
            || self.state.refused_ports.lock().unwrap().contains(&port)
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{}:{} refused", address.ip(), port),
            )));
        }
        Ok(Box::new(MockChannel {
            server: self.clone(),
            peer: SocketAddr::new(address.ip(), port),
            outbox: VecDeque::new(),
            closed: false,
            preauth: None,
            dialect: None,
            sessions: HashMap::new(),
            trees: HashMap::new(),
        }))
    }
}

fn is_core_command(command: Smb2Command) -> bool {
    matches!(
        command,
        Smb2Command::Negotiate
            | Smb2Command::SessionSetup
            | Smb2Command::Logoff
            | Smb2Command::TreeConnect
            | Smb2Command::TreeDisconnect
    )
}

#[derive(Default)]
struct ServerSession {
    rounds: usize,
    established: bool,
    reauthenticating: bool,
    preauth: Option<Vec<u8>>,
    digest: Option<SigningDigest>,
    encryption: Option<EncryptionContext>,
}

/// Server end of one connection
pub struct MockChannel {
    server: MockServer,
    peer: SocketAddr,
    outbox: VecDeque<Vec<u8>>,
    closed: bool,
    preauth: Option<Vec<u8>>,
    dialect: Option<Dialect>,
    sessions: HashMap<u64, ServerSession>,
    trees: HashMap<u32, String>,
}

impl MockChannel {
    fn handle(&mut self, message: &[u8]) -> Result<()> {
        let encrypted = is_transform_message(message);
        let plain = if encrypted {
            let session_id = LittleEndian::read_u64(&message[44..52]);
            let encryption = self
                .sessions
                .get(&session_id)
                .and_then(|s| s.encryption.as_ref())
                .ok_or_else(|| Error::Protocol("Encrypted request for unknown session".into()))?;
            encryption.decrypt_message(message)?
        } else {
            message.to_vec()
        };

        let header = Smb2Header::parse(&plain)?;
        let body = plain[Smb2Header::SIZE..].to_vec();
        let signed = header.flags.contains(Smb2HeaderFlags::SIGNED);
        if signed {
            if let Some(digest) = self
                .sessions
                .get(&header.session_id)
                .and_then(|s| s.digest.as_ref())
            {
                digest.verify(&plain)?;
            }
        }

        self.server.state.received.lock().unwrap().push(Received {
            address: self.peer.ip(),
            port: self.peer.port(),
            command: header.command,
            session_id: header.session_id,
            tree_id: header.tree_id,
            share: self.trees.get(&header.tree_id).cloned(),
            signed,
            encrypted,
            body: body.clone(),
        });

        match header.command {
            Smb2Command::Negotiate => self.negotiate(&header, &plain, &body),
            Smb2Command::SessionSetup => self.session_setup(&header, &plain),
            Smb2Command::Logoff => {
                self.reply(&header, NtStatus::SUCCESS, Vec::new(), encrypted)?;
                self.sessions.remove(&header.session_id);
                Ok(())
            }
            Smb2Command::TreeConnect => self.tree_connect(&header, &body, encrypted),
            Smb2Command::TreeDisconnect => {
                self.trees.remove(&header.tree_id);
                self.reply(&header, NtStatus::SUCCESS, Vec::new(), encrypted)
            }
            _ => self.request(&header, body, encrypted),
        }
    }

    fn negotiate(&mut self, header: &Smb2Header, plain: &[u8], body: &[u8]) -> Result<()> {
        let script = self.server.script();
        let smb2_only = body.first().copied() == Some(1);
        let wildcard = script.wildcard && !smb2_only;
        let revision = if wildcard {
            WILDCARD_REVISION
        } else {
            script.dialect.revision().unwrap_or(0x0202)
        };
        let is_311 = !wildcard && script.dialect == Dialect::Smb311;

        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&revision.to_le_bytes());
        out.extend_from_slice(&script.security_mode.bits().to_le_bytes());
        out.extend_from_slice(&script.capabilities.bits().to_le_bytes());
        out.extend_from_slice(&u16::from(is_311).to_le_bytes());
        let cipher = if is_311 {
            script.cipher.map_or(0, |c| c as u16)
        } else {
            0
        };
        out.extend_from_slice(&cipher.to_le_bytes());

        let response = self.build(header, NtStatus::SUCCESS, out, None);
        if is_311 {
            let sha = PreauthHashAlgorithm::Sha512;
            let hash = sha.chain(&sha.initial(), plain);
            self.preauth = Some(sha.chain(&hash, &response));
        }
        if !wildcard {
            self.dialect = Some(script.dialect);
        }
        self.outbox.push_back(response);
        Ok(())
    }

    fn session_setup(&mut self, header: &Smb2Header, plain: &[u8]) -> Result<()> {
        let script = self.server.script();
        let dialect = self.dialect.unwrap_or(script.dialect);
        let sha = PreauthHashAlgorithm::Sha512;
        let session_id = match header.session_id {
            0 => self.server.state.next_session_id.fetch_add(1, Ordering::SeqCst),
            id => id,
        };
        let connection_hash = self.preauth.clone();
        let session = self.sessions.entry(session_id).or_default();
        if session.established && !session.reauthenticating {
            session.reauthenticating = true;
            session.rounds = 0;
        }
        if session.rounds == 0 {
            session.preauth = connection_hash;
        }
        session.rounds += 1;
        if let Some(hash) = session.preauth.as_mut() {
            *hash = sha.chain(hash, plain);
        }

        let mut reply_header = header.clone();
        reply_header.session_id = session_id;
        if session.rounds < script.auth_rounds {
            let mut out = 0u16.to_le_bytes().to_vec();
            out.extend_from_slice(b"challenge");
            let response =
                self.build(&reply_header, NtStatus::MORE_PROCESSING_REQUIRED, out, None);
            let session = self.sessions.entry(session_id).or_default();
            if let Some(hash) = session.preauth.as_mut() {
                *hash = sha.chain(hash, &response);
            }
            self.outbox.push_back(response);
            return Ok(());
        }

        let mut flags = SessionFlags::empty();
        if script.guest {
            flags |= SessionFlags::IS_GUEST;
        }
        if script.encrypt_data {
            flags |= SessionFlags::ENCRYPT_DATA;
        }
        session.established = true;
        session.reauthenticating = false;
        session.digest = None;
        session.encryption = None;
        if let (Some(mut key), false) = (script.session_key.clone(), script.guest) {
            key.resize(16, 0);
            let preauth = session.preauth.as_deref();
            session.digest = Some(SigningDigest::new(&key, dialect, preauth)?);
            if dialect.is_smb3() {
                let cipher = match dialect {
                    Dialect::Smb311 => script.cipher.unwrap_or(CipherId::Aes128Gcm),
                    _ => CipherId::Aes128Ccm,
                };
                session.encryption =
                    Some(EncryptionContext::new(dialect, cipher, &key, preauth)?.peer());
            }
        }
        let out = flags.bits().to_le_bytes().to_vec();
        self.reply(&reply_header, NtStatus::SUCCESS, out, false)
    }

    fn tree_connect(&mut self, header: &Smb2Header, body: &[u8], encrypted: bool) -> Result<()> {
        let script = self.server.script();
        let unc = String::from_utf8_lossy(body).into_owned();
        let share = unc.rsplit('\\').next().unwrap_or_default().to_string();
        if script
            .missing_shares
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&share))
        {
            return self.reply(header, NtStatus::BAD_NETWORK_NAME, Vec::new(), encrypted);
        }

        let tree_id = self.server.state.next_tree_id.fetch_add(1, Ordering::SeqCst);
        self.trees.insert(tree_id, share.to_ascii_lowercase());
        let share_type = if share.eq_ignore_ascii_case("IPC$") {
            ShareType::Pipe
        } else {
            ShareType::Disk
        };
        let flags = if script.dfs_shares.iter().any(|s| s.eq_ignore_ascii_case(&share)) {
            ShareFlags::DFS
        } else {
            ShareFlags::empty()
        };
        let mut out = vec![share_type as u8];
        out.extend_from_slice(&flags.bits().to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        let mut reply_header = header.clone();
        reply_header.tree_id = tree_id;
        self.reply(&reply_header, NtStatus::SUCCESS, out, encrypted)
    }

    fn request(&mut self, header: &Smb2Header, body: Vec<u8>, encrypted: bool) -> Result<()> {
        let fault = self.server.state.faults.lock().unwrap().pop_front();
        if !self
            .sessions
            .get(&header.session_id)
            .map_or(false, |s| s.established)
        {
            return self.reply(header, NtStatus::USER_SESSION_DELETED, Vec::new(), encrypted);
        }
        match fault {
            Some(Fault::Drop) => {
                self.closed = true;
                Err(Error::Transport("Connection reset by peer".to_string()))
            }
            Some(Fault::Status(status)) => self.reply(header, status, Vec::new(), encrypted),
            Some(Fault::Interim) => {
                let mut interim = header.clone();
                interim.flags |= Smb2HeaderFlags::ASYNC_COMMAND;
                let response = self.build(&interim, NtStatus::PENDING, Vec::new(), None);
                self.outbox.push_back(response);
                self.reply(header, NtStatus::SUCCESS, body, encrypted)
            }
            Some(Fault::Stray) => {
                let mut stray = header.clone();
                stray.message_id = header.message_id.wrapping_add(1000);
                self.reply(&stray, NtStatus::ACCESS_DENIED, Vec::new(), encrypted)?;
                self.reply(header, NtStatus::SUCCESS, body, encrypted)
            }
            None => self.reply(header, NtStatus::SUCCESS, body, encrypted),
        }
    }

    fn build(
        &self,
        request: &Smb2Header,
        status: NtStatus,
        body: Vec<u8>,
        digest: Option<&SigningDigest>,
    ) -> Vec<u8> {
        let mut header = request.clone();
        header.status = status.to_u32();
        header.flags |= Smb2HeaderFlags::SERVER_TO_REDIR;
        header.flags.remove(Smb2HeaderFlags::SIGNED);
        header.signature = [0; 16];
        let mut raw = header.serialize();
        raw.extend_from_slice(&body);
        if let Some(digest) = digest {
            // a malformed header is impossible here
            let _ = digest.sign(&mut raw);
        }
        raw
    }

    fn reply(
        &mut self,
        request: &Smb2Header,
        status: NtStatus,
        body: Vec<u8>,
        encrypt: bool,
    ) -> Result<()> {
        let session = self.sessions.get(&request.session_id);
        let encryption = session.and_then(|s| s.encryption.as_ref()).filter(|_| encrypt);
        let digest = session
            .and_then(|s| s.digest.as_ref())
            .filter(|_| encryption.is_none());
        let raw = self.build(request, status, body, digest);
        let wire = match encryption {
            Some(encryption) => encryption.encrypt_message(&raw, request.session_id)?,
            None => raw,
        };
        self.outbox.push_back(wire);
        Ok(())
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.handle(message)
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        match self.outbox.pop_front() {
            Some(message) => Ok(message),
            None if self.closed => Err(Error::ConnectionClosed),
            None => Err(Error::Transport("Nothing to receive".to_string())),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

/// Fixed host table
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, name: &str, ips: &[IpAddr]) -> Self {
        self.hosts
            .lock()
            .unwrap()
            .insert(name.to_ascii_lowercase(), ips.to_vec());
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, name: &str, all: bool) -> Result<Vec<Address>> {
        let hosts = self.hosts.lock().unwrap();
        let mut found: Vec<Address> = hosts
            .get(&name.to_ascii_lowercase())
            .map(|ips| ips.iter().map(|ip| Address::new(name, *ip)).collect())
            .unwrap_or_default();
        if !all {
            found.truncate(1);
        }
        Ok(found)
    }
}

/// User credentials whose session key the [`MockServer`] knows
#[derive(Debug, Clone)]
pub struct TestCredentials {
    pub principal: Principal,
    pub key: Option<Vec<u8>>,
    pub rounds: usize,
    pub guest: bool,
}

impl TestCredentials {
    pub fn new(user: &str, key: Option<&[u8]>) -> Self {
        Self {
            principal: Principal::new("TEST", user),
            key: key.map(<[u8]>::to_vec),
            rounds: 2,
            guest: false,
        }
    }
}

impl Credentials for TestCredentials {
    fn clone_box(&self) -> Box<dyn Credentials> {
        Box::new(self.clone())
    }

    fn principal(&self) -> Principal {
        self.principal.clone()
    }

    fn is_anonymous(&self) -> bool {
        false
    }

    fn is_guest(&self) -> bool {
        self.guest
    }

    fn create_context(
        &self,
        _target_host: &str,
        _target_domain: Option<&str>,
        _initial_token: &[u8],
        _signing: bool,
    ) -> Result<Box<dyn AuthContext>> {
        Ok(Box::new(TestAuthContext {
            key: self.key.clone(),
            rounds: self.rounds,
            calls: 0,
        }))
    }
}

struct TestAuthContext {
    key: Option<Vec<u8>>,
    rounds: usize,
    calls: usize,
}

impl AuthContext for TestAuthContext {
    fn init_sec_context(&mut self, _token: &[u8]) -> Result<Option<Vec<u8>>> {
        self.calls += 1;
        Ok(Some(format!("token-{}", self.calls).into_bytes()))
    }

    fn is_established(&self) -> bool {
        self.calls >= self.rounds
    }

    fn signing_key(&self) -> Option<Vec<u8>> {
        self.key.clone().filter(|_| self.is_established())
    }
}
