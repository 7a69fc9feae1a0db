//! End-to-end tests against an in-process scripted server

pub mod mock_codec;
pub mod mock_server;

pub mod session_scenarios;

pub use mock_codec::{MockCodec, MockRequest};
pub use mock_server::{Fault, MockServer, Received, ServerScript, StaticResolver, TestCredentials};

use crate::auth::{AnonymousCredentials, Credentials};
use crate::config::ClientConfig;
use crate::context::SmbContext;
use crate::dfs::StaticDfsResolver;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
pub const SECOND_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
pub const KEY: &[u8] = b"0123456789abcdef";

/// Context wired to a [`MockServer`]
///
/// `server` resolves to [`SERVER_IP`], `fs2` to [`SECOND_IP`] and `multi`
/// to both, in that order.
pub struct TestBed {
    pub ctx: SmbContext,
    pub server: MockServer,
    pub dfs: Arc<StaticDfsResolver>,
}

impl TestBed {
    pub fn new(config: ClientConfig, script: ServerScript) -> Self {
        Self::with_credentials(config, script, Arc::new(TestCredentials::new("alice", Some(KEY))))
    }

    /// Anonymous logon; the server finishes session setup in one round
    pub fn anonymous(config: ClientConfig, script: ServerScript) -> Self {
        let script = ServerScript {
            auth_rounds: 1,
            ..script
        };
        Self::with_credentials(config, script, Arc::new(AnonymousCredentials))
    }

    pub fn with_credentials(
        config: ClientConfig,
        script: ServerScript,
        credentials: Arc<dyn Credentials>,
    ) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let server = MockServer::new(script);
        let dfs = Arc::new(StaticDfsResolver::new());
        let resolver = StaticResolver::new()
            .with_host("server", &[SERVER_IP])
            .with_host("fs2", &[SECOND_IP])
            .with_host("multi", &[SERVER_IP, SECOND_IP]);
        let ctx = SmbContext::new(config, Arc::new(MockCodec), credentials)
            .unwrap()
            .with_resolver(Arc::new(resolver))
            .with_dfs(dfs.clone())
            .with_connector(Arc::new(server.clone()));
        Self { ctx, server, dfs }
    }

    /// Server key with signing the default way
    pub fn signed(config: ClientConfig) -> Self {
        Self::new(
            config,
            ServerScript {
                session_key: Some(KEY.to_vec()),
                ..Default::default()
            },
        )
    }
}
