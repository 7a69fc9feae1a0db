//! Session scenarios: authentication, signing, encryption and recovery

use super::*;
use crate::client::{Session, Transport};
use crate::error::{Error, NtStatus};
use crate::protocol::{CipherId, Dialect, RawResponse, RequestParams, Response, Smb2Command};

async fn connect(bed: &TestBed) -> (Arc<Transport>, Arc<Session>) {
    let transport = bed
        .ctx
        .pool()
        .get_transport(&bed.ctx, "server", 445, false, false)
        .await
        .unwrap();
    let session = transport.get_smb_session(&bed.ctx, Some("server"), None).await;
    (transport, session)
}

fn commands(bed: &TestBed, command: Smb2Command) -> Vec<Received> {
    bed.server
        .received()
        .into_iter()
        .filter(|r| r.command == command)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signed_session_setup() {
        let bed = TestBed::signed(ClientConfig::default());
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();

        assert!(session.is_connected());
        assert!(session.digest().is_some());
        assert_eq!(session.session_key().unwrap().len(), 16);
        assert_eq!(session.session_id(), 0x1000);

        let setups = commands(&bed, Smb2Command::SessionSetup);
        assert_eq!(setups.len(), 2);
        assert_eq!(setups[0].session_id, 0);
        assert_eq!(setups[1].session_id, 0x1000);

        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        assert!(tree.is_connected());
        assert!(commands(&bed, Smb2Command::TreeConnect)[0].signed);
    }

    #[tokio::test]
    async fn test_setup_is_done_once() {
        let bed = TestBed::signed(ClientConfig::default());
        let (transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        session.session_setup().await.unwrap();

        let same = transport.get_smb_session(&bed.ctx, Some("SERVER"), None).await;
        assert!(Arc::ptr_eq(&session, &same));
        same.session_setup().await.unwrap();
        assert_eq!(bed.server.count(Smb2Command::SessionSetup), 2);
    }

    #[tokio::test]
    async fn test_unsigned_server_leaves_session_unsigned() {
        let bed = TestBed::new(ClientConfig::default(), ServerScript::default());
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();

        assert!(session.digest().is_none());
        assert!(session.session_key().is_ok());
        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        assert!(!commands(&bed, Smb2Command::TreeConnect)[0].signed);
    }

    #[tokio::test]
    async fn test_enforced_signing_without_key_fails() {
        let bed = TestBed::with_credentials(
            ClientConfig {
                signing_enforced: true,
                ..Default::default()
            },
            ServerScript::default(),
            Arc::new(TestCredentials::new("alice", None)),
        );
        let (_transport, session) = connect(&bed).await;
        let err = session.session_setup().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!session.is_connected());
        assert_eq!(session.session_id(), 0);
    }

    #[tokio::test]
    async fn test_smb311_preauth_integrity() {
        let bed = TestBed::new(
            ClientConfig::default(),
            ServerScript {
                dialect: Dialect::Smb311,
                session_key: Some(KEY.to_vec()),
                ..Default::default()
            },
        );
        let (transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();

        let connection_hash = transport.preauth_integrity_hash().unwrap();
        let session_hash = session.preauth_hash().unwrap();
        assert_eq!(connection_hash.len(), 64);
        assert_eq!(session_hash.len(), 64);
        assert_ne!(connection_hash, session_hash);

        // signing keys derived from the hash agree with the server
        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        assert!(commands(&bed, Smb2Command::TreeConnect)[0].signed);
    }

    #[tokio::test]
    async fn test_server_required_encryption() {
        let bed = TestBed::new(
            ClientConfig::default(),
            ServerScript {
                session_key: Some(KEY.to_vec()),
                encrypt_data: true,
                ..Default::default()
            },
        );
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        assert!(session.is_encrypted());

        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        let connect = &commands(&bed, Smb2Command::TreeConnect)[0];
        assert!(connect.encrypted);
        assert!(connect.signed);
    }

    #[tokio::test]
    async fn test_client_requested_encryption_uses_server_cipher() {
        let bed = TestBed::new(
            ClientConfig {
                encryption_enabled: true,
                ..Default::default()
            },
            ServerScript {
                dialect: Dialect::Smb311,
                cipher: Some(CipherId::Aes256Gcm),
                session_key: Some(KEY.to_vec()),
                ..Default::default()
            },
        );
        let (transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        assert!(session.is_encrypted());
        assert_eq!(
            transport.negotiation().unwrap().cipher().unwrap(),
            Some(CipherId::Aes256Gcm)
        );

        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        assert!(commands(&bed, Smb2Command::TreeConnect)[0].encrypted);
    }

    #[tokio::test]
    async fn test_encryption_not_requested_on_smb2() {
        let bed = TestBed::new(
            ClientConfig {
                encryption_enabled: true,
                ..Default::default()
            },
            ServerScript {
                dialect: Dialect::Smb210,
                session_key: Some(KEY.to_vec()),
                ..Default::default()
            },
        );
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        assert!(!session.is_encrypted());
        assert!(session.digest().is_some());
    }

    #[tokio::test]
    async fn test_guest_fallback_refused() {
        let bed = TestBed::new(
            ClientConfig::default(),
            ServerScript {
                guest: true,
                ..Default::default()
            },
        );
        let (_transport, session) = connect(&bed).await;
        let err = session.session_setup().await.unwrap_err();
        assert!(matches!(err, Error::Status(NtStatus::LOGON_FAILURE)));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_guest_fallback_allowed_does_not_sign() {
        let bed = TestBed::new(
            ClientConfig {
                allow_guest_fallback: true,
                ..Default::default()
            },
            ServerScript {
                guest: true,
                session_key: Some(KEY.to_vec()),
                ..Default::default()
            },
        );
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        assert!(session.is_connected());
        assert!(session.digest().is_none());
    }

    #[tokio::test]
    async fn test_anonymous_session_has_no_key() {
        let bed = TestBed::anonymous(
            ClientConfig {
                ipc_signing_enforced: false,
                ..Default::default()
            },
            ServerScript::default(),
        );
        let (_transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();
        assert!(session.is_connected());
        assert!(matches!(session.session_key(), Err(Error::NoSessionKey)));
        assert!(session.digest().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_reauthenticated() {
        let bed = TestBed::signed(ClientConfig::default());
        let (_transport, session) = connect(&bed).await;
        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();
        let session_id = session.session_id();

        bed.server
            .push_fault(Fault::Status(NtStatus::NETWORK_SESSION_EXPIRED));
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\file.txt");
        let mut response = RawResponse::new();
        tree.send(&mut request, &mut response, RequestParams::default())
            .await
            .unwrap();

        assert_eq!(request.resets, 1);
        assert_eq!(session.session_id(), session_id);
        assert_eq!(bed.server.count(Smb2Command::SessionSetup), 4);
        assert!(session.digest().is_some());
        let creates = bed.server.requests();
        assert_eq!(creates.len(), 2);
        assert!(creates.iter().all(|r| r.signed));
    }

    #[tokio::test]
    async fn test_server_asking_for_extra_rounds_fails_setup() {
        let bed = TestBed::new(
            ClientConfig::default(),
            ServerScript {
                session_key: Some(KEY.to_vec()),
                auth_rounds: 3,
                ..Default::default()
            },
        );
        let (_transport, session) = connect(&bed).await;

        let err = session.session_setup().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!session.is_connected());
        assert!(session.digest().is_none());
        assert_eq!(bed.server.count(Smb2Command::SessionSetup), 2);
    }

    #[tokio::test]
    async fn test_deleted_session_drops_the_transport() {
        let bed = TestBed::signed(ClientConfig::default());
        let (transport, session) = connect(&bed).await;
        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();

        bed.server
            .push_fault(Fault::Status(NtStatus::USER_SESSION_DELETED));
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\file.txt");
        let err = tree
            .send(&mut request, &mut RawResponse::new(), RequestParams::default())
            .await
            .unwrap_err();

        assert!(err.is_transport_error());
        assert!(transport.is_disconnected());
        assert!(!bed.ctx.pool().contains(&transport));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_interim_and_stray_responses_are_skipped() {
        let bed = TestBed::signed(ClientConfig::default());
        let (_transport, session) = connect(&bed).await;
        let tree = session.get_smb_tree("data", None);

        bed.server.push_fault(Fault::Interim);
        let mut response = RawResponse::new();
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\a");
        tree.send(&mut request, &mut response, RequestParams::default())
            .await
            .unwrap();
        assert_eq!(response.status(), NtStatus::SUCCESS);

        bed.server.push_fault(Fault::Stray);
        let mut response = RawResponse::new();
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\b");
        tree.send(&mut request, &mut response, RequestParams::default())
            .await
            .unwrap();
        assert_eq!(response.status(), NtStatus::SUCCESS);
        assert_eq!(&response.data()[64..], b"\\b");
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_transport_error() {
        let bed = TestBed::signed(ClientConfig::default());
        let (transport, session) = connect(&bed).await;
        let tree = session.get_smb_tree("data", None);

        bed.server.push_fault(Fault::Status(NtStatus::ACCESS_DENIED));
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\secret");
        let err = tree
            .send(&mut request, &mut RawResponse::new(), RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status(NtStatus::ACCESS_DENIED)));
        assert!(transport.is_connected());

        bed.server.push_fault(Fault::Status(NtStatus::CANCELLED));
        let mut request = MockRequest::with_path(Smb2Command::Create, "\\slow");
        tree.send(&mut request, &mut RawResponse::new(), RequestParams::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_logoff_disconnects_trees() {
        let bed = TestBed::signed(ClientConfig::default());
        let (_transport, session) = connect(&bed).await;
        let tree = session.get_smb_tree("data", None);
        tree.tree_connect().await.unwrap();

        let in_use = session.logoff(false, true).await.unwrap();
        assert!(in_use);
        assert!(!session.is_connected());
        assert!(!tree.is_connected());
        assert_eq!(session.num_trees(), 0);
        assert_eq!(bed.server.count(Smb2Command::TreeDisconnect), 1);
        assert_eq!(bed.server.count(Smb2Command::Logoff), 1);
    }

    #[tokio::test]
    async fn test_graceful_transport_disconnect_logs_off() {
        let bed = TestBed::signed(ClientConfig::default());
        let (transport, session) = connect(&bed).await;
        session.session_setup().await.unwrap();

        transport.disconnect(false, false).await.unwrap();
        assert!(transport.is_disconnected());
        assert_eq!(bed.server.count(Smb2Command::Logoff), 1);
        assert!(!session.is_connected());

        // idempotent
        assert!(!transport.disconnect(false, false).await.unwrap());
        assert_eq!(bed.server.count(Smb2Command::Logoff), 1);
    }
}
