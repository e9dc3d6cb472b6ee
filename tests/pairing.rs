//! Pairing integration tests over the in-process relay.
//!
//! A requester device (no credential) obtains a session from a signer device
//! holding a software passkey or wallet, through `SimRelay`.
//!
//! Run with:
//!   cargo test --test pairing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use authlink::config::PairingConfig;
use authlink::credential::verify::verify_standard;
use authlink::credential::{
    Credential, CredentialKind, CredentialProvider, ExternalWalletProvider, PasskeyProvider, PlatformError,
    SoftwareAuthenticator, SoftwareWallet, StandardCredential,
};
use authlink::identity::Key;
use authlink::pairing::{
    CreateSessionReply, EnvelopeType, PairingCode, PairingEnvelope, PairingRequester, PairingSigner, SessionGrant,
    SignerOutcome,
};
use authlink::relay::{RelayClient, RelayError, SimRelay};
use authlink::session::key::{compressed_public_key, generate_secret};
use authlink::session::{SessionConfig, SessionInfo, SessionKeyManager, SessionState, Timestamp};
use authlink::{AuthError, ErrorKind, RecoveryAction};

const HOUR: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type SoftwarePasskey = PasskeyProvider<SoftwareAuthenticator>;

async fn passkey_provider() -> (Arc<SoftwarePasskey>, Credential) {
    let provider = Arc::new(PasskeyProvider::new(
        SoftwareAuthenticator::new("authlink.test"),
        "authlink.test",
    ));
    let credential = provider.create_credential(b"enroll", "alice").await.unwrap();
    (provider, credential)
}

fn session_request(ttl: Duration) -> SessionInfo {
    SessionInfo {
        expire_at: Timestamp::now().saturating_add(ttl),
        session_key: compressed_public_key(&generate_secret()).unwrap(),
    }
}

/// A credential whose signing prompt never completes.
struct StalledProvider {
    credential: Credential,
}

impl StalledProvider {
    fn new() -> Self {
        Self {
            credential: Credential {
                kind: CredentialKind::ExternalKey,
                public_key: Key::Ethereum([0x42; 20]),
                identifier: vec![0x42; 20],
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StalledProvider {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ExternalKey
    }

    async fn create_credential(&self, _challenge: &[u8], _account_hint: &str) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }

    async fn sign(&self, _sign_bytes: &[u8]) -> Result<StandardCredential, AuthError> {
        std::future::pending().await
    }

    fn credential(&self) -> Option<Credential> {
        Some(self.credential.clone())
    }
}

// ---------------------------------------------------------------------------
// Successful pairing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_passkey_signer_authorizes_session() {
    let relay = SimRelay::new();
    let client = relay.client();
    let (provider, credential) = passkey_provider().await;

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    // The code travels as text (a QR code) to the other device.
    let scanned: PairingCode = requester.code().to_string().parse().unwrap();
    let signer = PairingSigner::join(&client, &scanned, provider.clone(), PairingConfig::default())
        .await
        .unwrap();

    let manager = SessionKeyManager::in_memory(SessionConfig::default());
    let (outcome, session) = tokio::join!(signer.run(), manager.create_session_with(&requester, HOUR));
    let session = session.unwrap();

    match outcome.unwrap() {
        SignerOutcome::Authorized { expire_at, .. } => assert_eq!(expire_at, session.expire_at()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(*session.key_hash(), credential.key_hash().unwrap());
    assert_eq!(requester.signer_key(), Some(credential.public_key));
    verify_standard(
        &credential.public_key,
        &session.authorization().signature,
        &session.info().sign_bytes().unwrap(),
    )
    .unwrap();
    assert!(matches!(manager.state(), SessionState::Active { .. }));
    assert_eq!(provider.authenticator().assertion_count(), 1);

    // A channel carries a single attempt.
    let err = requester.request_session(&session_request(HOUR)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PairingAborted);
}

#[tokio::test]
async fn test_wallet_signer_authorizes_session() {
    let relay = SimRelay::new();
    let client = relay.client();
    let wallet = Arc::new(ExternalWalletProvider::new(SoftwareWallet::random()));
    let credential = wallet.create_credential(b"connect", "bob").await.unwrap();

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let signer = PairingSigner::join(&client, requester.code(), wallet.clone(), PairingConfig::default())
        .await
        .unwrap();

    let manager = SessionKeyManager::in_memory(SessionConfig::default());
    let (outcome, session) = tokio::join!(signer.run(), manager.create_session_with(&requester, HOUR));
    assert!(matches!(outcome.unwrap(), SignerOutcome::Authorized { .. }));

    let session = session.unwrap();
    assert_eq!(*session.key_hash(), credential.key_hash().unwrap());
    assert_eq!(requester.signer_key(), Some(Key::Ethereum(wallet.wallet().address())));
}

#[tokio::test]
async fn test_request_sent_before_signer_joins_is_delivered() {
    let relay = SimRelay::new();
    let client = relay.client();
    let (provider, _) = passkey_provider().await;

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let code = requester.code().clone();
    let manager = SessionKeyManager::in_memory(SessionConfig::default());

    let signer_side = async {
        tokio::task::yield_now().await;
        let signer = PairingSigner::join(&client, &code, provider.clone(), PairingConfig::default())
            .await
            .unwrap();
        signer.run().await
    };
    let (session, outcome) = tokio::join!(manager.create_session_with(&requester, HOUR), signer_side);
    session.unwrap();
    assert!(matches!(outcome.unwrap(), SignerOutcome::Authorized { .. }));
}

// ---------------------------------------------------------------------------
// Duplicates and stray frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicated_frames_issue_one_session() {
    let relay = SimRelay::new();
    relay.set_duplicate_delivery(true);
    let client = relay.client();
    let (provider, credential) = passkey_provider().await;

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let signer = PairingSigner::join(&client, requester.code(), provider.clone(), PairingConfig::default())
        .await
        .unwrap();

    let manager = SessionKeyManager::in_memory(SessionConfig::default());
    let mut events = manager.subscribe();
    let (outcome, session) = tokio::join!(signer.run(), manager.create_session_with(&requester, HOUR));
    outcome.unwrap();
    assert_eq!(*session.unwrap().key_hash(), credential.key_hash().unwrap());

    assert_eq!(provider.authenticator().assertion_count(), 1);
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_requests_on_one_channel_sign_once() {
    let relay = SimRelay::new();
    let client = relay.client();
    let (provider, _) = passkey_provider().await;

    let requester = client.open().await.unwrap();
    let code = PairingCode::new(requester.channel_id().clone());
    let signer = PairingSigner::join(&client, &code, provider.clone(), PairingConfig::default())
        .await
        .unwrap();

    let first = PairingEnvelope::create_session(&session_request(HOUR)).unwrap();
    let second = PairingEnvelope::create_session(&session_request(HOUR)).unwrap();
    requester.send(&first.to_frame().unwrap()).await.unwrap();
    requester.send(&second.to_frame().unwrap()).await.unwrap();

    match signer.run().await.unwrap() {
        SignerOutcome::Authorized { request_id, .. } => assert_eq!(request_id, first.id),
        other => panic!("unexpected outcome {:?}", other),
    }

    let reply = PairingEnvelope::from_frame(&requester.recv().await.unwrap()).unwrap();
    assert_eq!(reply.id, first.id);
    assert!(matches!(
        reply.payload_as::<CreateSessionReply>().unwrap(),
        CreateSessionReply::Authorized(_)
    ));
    // The signer is done with the channel; no second reply follows.
    assert_eq!(requester.recv().await.unwrap_err(), RelayError::Disconnected);
    assert_eq!(provider.authenticator().assertion_count(), 1);
}

#[tokio::test]
async fn test_stray_frames_are_ignored() {
    let relay = SimRelay::new();
    let client = relay.client();
    let wallet = ExternalWalletProvider::new(SoftwareWallet::random());
    let credential = wallet.create_credential(b"connect", "bob").await.unwrap();

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let peer = client.join(requester.code().channel_id()).await.unwrap();
    let manager = SessionKeyManager::in_memory(SessionConfig::default());

    let answer = async {
        let request = PairingEnvelope::from_frame(&peer.recv().await.unwrap()).unwrap();
        let info: SessionInfo = request.payload_as().unwrap();
        let grant = CreateSessionReply::Authorized(SessionGrant {
            key: credential.public_key,
            authorization: wallet.sign(&info.sign_bytes().unwrap()).await.unwrap(),
        });

        let unknown_id = PairingEnvelope::reply(Uuid::new_v4(), &grant).unwrap();
        let wrong_type = PairingEnvelope {
            kind: EnvelopeType::Unknown("session-created".into()),
            ..PairingEnvelope::reply(request.id, &grant).unwrap()
        };
        peer.send(&unknown_id.to_frame().unwrap()).await.unwrap();
        peer.send(&wrong_type.to_frame().unwrap()).await.unwrap();
        peer.send("{not json").await.unwrap();
        peer.send(&PairingEnvelope::reply(request.id, &grant).unwrap().to_frame().unwrap())
            .await
            .unwrap();
    };

    let (session, ()) = tokio::join!(manager.create_session_with(&requester, HOUR), answer);
    assert_eq!(*session.unwrap().key_hash(), credential.key_hash().unwrap());
}

#[tokio::test]
async fn test_forged_grant_is_denied() {
    let relay = SimRelay::new();
    let client = relay.client();
    let wallet = ExternalWalletProvider::new(SoftwareWallet::random());
    let credential = wallet.create_credential(b"connect", "mallory").await.unwrap();

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let peer = client.join(requester.code().channel_id()).await.unwrap();
    let manager = SessionKeyManager::in_memory(SessionConfig::default());

    let answer = async {
        let request = PairingEnvelope::from_frame(&peer.recv().await.unwrap()).unwrap();
        // Signs a different session than the one requested.
        let other = session_request(HOUR);
        let grant = CreateSessionReply::Authorized(SessionGrant {
            key: credential.public_key,
            authorization: wallet.sign(&other.sign_bytes().unwrap()).await.unwrap(),
        });
        peer.send(&PairingEnvelope::reply(request.id, &grant).unwrap().to_frame().unwrap())
            .await
            .unwrap();
    };

    let (session, ()) = tokio::join!(manager.create_session_with(&requester, HOUR), answer);
    let err = session.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
    assert_eq!(manager.state(), SessionState::Absent);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_signer_rejection_keeps_its_cause() {
    let relay = SimRelay::new();
    let client = relay.client();
    let (provider, _) = passkey_provider().await;
    provider.authenticator().fail_next(PlatformError::Cancelled);

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let signer = PairingSigner::join(&client, requester.code(), provider.clone(), PairingConfig::default())
        .await
        .unwrap();

    let manager = SessionKeyManager::in_memory(SessionConfig::default());
    let (outcome, session) = tokio::join!(signer.run(), manager.create_session_with(&requester, HOUR));

    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::UserCancelled);
    let err = session.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
    assert_eq!(err.cause_kind(), ErrorKind::UserCancelled);
    assert_eq!(err.kind().recovery(), RecoveryAction::RetryWithFreshChannel);
    assert_eq!(manager.state(), SessionState::Absent);
}

#[tokio::test]
async fn test_signer_refuses_bad_requests() {
    let relay = SimRelay::new();
    let client = relay.client();
    let (provider, _) = passkey_provider().await;

    let expired = SessionInfo {
        expire_at: Timestamp::from_millis(1_000),
        ..session_request(HOUR)
    };
    let too_long = session_request(PairingConfig::default().max_session_ttl + HOUR);
    let not_a_point = SessionInfo {
        session_key: [0x05; 33],
        ..session_request(HOUR)
    };

    for (info, expected) in [
        (expired, ErrorKind::AuthorizationDenied),
        (too_long, ErrorKind::AuthorizationDenied),
        (not_a_point, ErrorKind::InvalidKeyMaterial),
    ] {
        let requester = client.open().await.unwrap();
        let code = PairingCode::new(requester.channel_id().clone());
        let signer = PairingSigner::join(&client, &code, provider.clone(), PairingConfig::default())
            .await
            .unwrap();

        let request = PairingEnvelope::create_session(&info).unwrap();
        requester.send(&request.to_frame().unwrap()).await.unwrap();
        assert_eq!(signer.run().await.unwrap_err().kind(), expected);

        let reply = PairingEnvelope::from_frame(&requester.recv().await.unwrap()).unwrap();
        match reply.payload_as::<CreateSessionReply>().unwrap() {
            CreateSessionReply::Rejected(rejection) => assert_eq!(rejection.kind, expected),
            other => panic!("unexpected reply {:?}", other),
        }
    }
    assert_eq!(provider.authenticator().assertion_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out() {
    let relay = SimRelay::new();
    let client = relay.client();
    let config = PairingConfig::default();
    let timeout = config.response_timeout;

    let requester = PairingRequester::open(&client, config).await.unwrap();
    let _silent_peer = client.join(requester.code().channel_id()).await.unwrap();
    let manager = SessionKeyManager::in_memory(SessionConfig::default());

    let start = tokio::time::Instant::now();
    let err = manager.create_session_with(&requester, HOUR).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PairingAborted);
    assert_eq!(err.kind().recovery(), RecoveryAction::RetryWithFreshChannel);
    assert!(start.elapsed() >= timeout);
    assert_eq!(manager.state(), SessionState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_relay_drop_aborts_without_waiting() {
    let relay = SimRelay::new();
    let client = relay.client();
    let config = PairingConfig::default();
    let timeout = config.response_timeout;

    let requester = PairingRequester::open(&client, config).await.unwrap();
    let channel = requester.code().channel_id().clone();
    let _silent_peer = client.join(&channel).await.unwrap();
    let manager = SessionKeyManager::in_memory(SessionConfig::default());

    let start = tokio::time::Instant::now();
    let drop_channel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        relay.drop_channel(&channel);
    };
    let (session, ()) = tokio::join!(manager.create_session_with(&requester, HOUR), drop_channel);

    assert_eq!(session.unwrap_err().kind(), ErrorKind::PairingAborted);
    assert!(start.elapsed() < timeout);
    assert_eq!(manager.state(), SessionState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_abandoning_a_pairing_cancels_the_signer() {
    let relay = SimRelay::new();
    let client = relay.client();

    let requester = PairingRequester::open(&client, PairingConfig::default()).await.unwrap();
    let stalled: Arc<dyn CredentialProvider> = Arc::new(StalledProvider::new());
    let signer = PairingSigner::join(&client, requester.code(), stalled, PairingConfig::default())
        .await
        .unwrap();
    let signer_task = tokio::spawn(async move { signer.run().await });

    let manager = SessionKeyManager::in_memory(SessionConfig::default());
    // The user navigates away before the other device answers.
    let attempt = tokio::time::timeout(Duration::from_secs(5), manager.create_session_with(&requester, HOUR)).await;
    assert!(attempt.is_err());
    assert_eq!(manager.state(), SessionState::Absent);

    assert_eq!(signer_task.await.unwrap().unwrap(), SignerOutcome::Cancelled);

    // The manager is usable again right away.
    let (local, _) = passkey_provider().await;
    manager.create_session(local.as_ref(), HOUR).await.unwrap();
    assert!(matches!(manager.state(), SessionState::Active { .. }));
}
