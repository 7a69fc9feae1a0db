//! Error types for the SMB connection core

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SMB client operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Name resolution produced no address
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// Connection level fault (socket closed, transport torn down)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation not supported by the negotiated dialect or security state
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Reference counting misuse
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Server returned an error status
    #[error("Server returned {0}")]
    Status(NtStatus),

    /// Connecting a tree to its server failed
    #[error("Failed to connect to server {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: Box<Error>,
    },

    /// No tree, session or transport is attached yet
    #[error("Not connected")]
    NotConnected,

    /// Session setup has not produced a key yet
    #[error("No session key available")]
    NoSessionKey,

    /// Session did not establish an encryption context
    #[error("Encryption not enabled")]
    EncryptionNotEnabled,

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Preauthentication integrity failure
    #[error("Preauthentication integrity error: {0}")]
    Integrity(String),

    /// Protocol parsing error
    #[error("Protocol parsing error: {0}")]
    ParseError(String),

    /// Invalid SMB header
    #[error("Invalid SMB header: {0}")]
    InvalidHeader(String),

    /// Buffer too small
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Encryption error
    #[error("Encryption/Decryption error: {0}")]
    CryptoError(String),

    /// Signing error
    #[error("Message signing error: {0}")]
    SigningError(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid NetBIOS name
    #[error("Invalid NetBIOS name: {0}")]
    InvalidNetBiosName(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether this error is a connection level fault that a reconnect can cure
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Transport(_) | Error::Timeout | Error::ConnectionClosed
        )
    }

    /// The server status carried by this error, if any
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            Error::Status(status) => Some(*status),
            Error::ConnectFailed { source, .. } => source.status(),
            _ => None,
        }
    }

    pub(crate) fn lifecycle(what: &str) -> Self {
        Error::Lifecycle(format!("{} usage count dropped below zero", what))
    }
}

/// NT status code as returned by the server
///
/// The raw value is kept intact; codes the core does not name are still
/// carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    /// The operation completed successfully
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    /// The operation is still in progress (interim response)
    pub const PENDING: NtStatus = NtStatus(0x0000_0103);
    /// Buffer overflow, partial data returned
    pub const BUFFER_OVERFLOW: NtStatus = NtStatus(0x8000_0005);
    /// No more files
    pub const NO_MORE_FILES: NtStatus = NtStatus(0x8000_0006);
    /// The parameter is incorrect
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
    /// More processing required
    pub const MORE_PROCESSING_REQUIRED: NtStatus = NtStatus(0xC000_0016);
    /// Access denied
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    /// The object name is not found
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    /// The user name or password is incorrect
    pub const LOGON_FAILURE: NtStatus = NtStatus(0xC000_006D);
    /// Account is disabled
    pub const ACCOUNT_DISABLED: NtStatus = NtStatus(0xC000_0072);
    /// The request is not supported
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    /// Bad network name
    pub const BAD_NETWORK_NAME: NtStatus = NtStatus(0xC000_00CC);
    /// The request was cancelled
    pub const CANCELLED: NtStatus = NtStatus(0xC000_0120);
    /// The session was deleted by the server
    pub const USER_SESSION_DELETED: NtStatus = NtStatus(0xC000_0203);
    /// The path is served by another DFS target
    pub const PATH_NOT_COVERED: NtStatus = NtStatus(0xC000_0257);
    /// The session expired and must be re-authenticated
    pub const NETWORK_SESSION_EXPIRED: NtStatus = NtStatus(0xC000_035C);

    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::SUCCESS
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        self.0 & 0xC000_0000 == 0xC000_0000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        self.0 & 0x8000_0000 == 0x8000_0000 && !self.is_error()
    }

    /// Raw 32-bit value
    pub fn to_u32(self) -> u32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            NtStatus::SUCCESS => "Success",
            NtStatus::PENDING => "Pending",
            NtStatus::BUFFER_OVERFLOW => "Buffer overflow",
            NtStatus::NO_MORE_FILES => "No more files",
            NtStatus::INVALID_PARAMETER => "Invalid parameter",
            NtStatus::MORE_PROCESSING_REQUIRED => "More processing required",
            NtStatus::ACCESS_DENIED => "Access denied",
            NtStatus::OBJECT_NAME_NOT_FOUND => "Object name not found",
            NtStatus::LOGON_FAILURE => "Logon failure",
            NtStatus::ACCOUNT_DISABLED => "Account disabled",
            NtStatus::NOT_SUPPORTED => "Not supported",
            NtStatus::BAD_NETWORK_NAME => "Bad network name",
            NtStatus::CANCELLED => "Cancelled",
            NtStatus::USER_SESSION_DELETED => "User session deleted",
            NtStatus::PATH_NOT_COVERED => "Path not covered",
            NtStatus::NETWORK_SESSION_EXPIRED => "Network session expired",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u32> for NtStatus {
    fn from(value: u32) -> Self {
        NtStatus(value)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "status 0x{:08X}", self.0),
        }
    }
}
