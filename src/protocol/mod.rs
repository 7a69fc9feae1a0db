//! SMB protocol definitions used by the connection core

pub mod dialect;
pub mod header;
pub mod message;
pub mod negotiate;
pub mod smb2_constants;

pub use dialect::Dialect;
pub use header::*;
pub use message::{
    Codec, NegotiateParams, RawResponse, Request, RequestHeader, RequestParams, Response,
    SessionSetupParams, SessionSetupReply, TreeConnectReply,
};
pub use negotiate::{Negotiation, Smb1Negotiation, Smb2Negotiation};
pub use smb2_constants::*;
