// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use tempfile::tempdir;

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let registry = Arc::new(Registry::open(dir.path().join("registry.json")).unwrap());
    let tokens = Arc::new(TokenService::open(dir.path().join("tokens.json")).unwrap());
    Fixture { _dir: dir, registry, tokens }
}

fn keypair() -> (SigningKey<Sha256>, String) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let pem = private
        .to_public_key()
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    (SigningKey::new(private), pem)
}

fn registration(token: &str, public_key: &str) -> AgentMessage {
    AgentMessage::Registration {
        token: token.to_string(),
        public_key: public_key.to_string(),
        hostname: "h1".to_string(),
        platform: "linux/amd64".to_string(),
        api_port: Some(8088),
    }
}

#[test]
fn registration_with_valid_token_admits_and_issues_id() {
    let f = fixture();
    let token = f.tokens.create(1_000, 3600, None).unwrap();

    let admission = admit(
        &f.registry,
        &f.tokens,
        registration(&token.token, "PEM"),
        Some("10.0.0.9".to_string()),
        2_000,
    )
    .unwrap();

    assert!(admission.newly_registered);
    let record = f.registry.get(&admission.agent_id).unwrap();
    assert_eq!(record.status, AgentStatus::Online);
    assert_eq!(record.observed_ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(record.public_key, "PEM");
    assert!(matches!(
        admission.reply,
        Some(ControllerMessage::Registered { ref agent_id }) if *agent_id == admission.agent_id
    ));

    // Token is consumed and bound to the issued id.
    let tokens = f.tokens.list();
    assert_eq!(tokens[0].used_by.as_ref(), Some(&admission.agent_id));
}

#[test]
fn token_reuse_is_rejected_without_state_mutation() {
    let f = fixture();
    let token = f.tokens.create(1_000, 3600, None).unwrap();
    let first = admit(&f.registry, &f.tokens, registration(&token.token, "K1"), None, 2_000)
        .unwrap();

    let second = admit(&f.registry, &f.tokens, registration(&token.token, "K2"), None, 3_000);
    assert!(matches!(second, Err(AdmissionReject::Token(TokenError::AlreadyUsed))));

    // The original binding is untouched.
    assert_eq!(f.registry.get(&first.agent_id).unwrap().public_key, "K1");
    assert_eq!(f.registry.list().len(), 1);
}

#[test]
fn expired_token_rejected() {
    let f = fixture();
    let token = f.tokens.create(1_000, 1, None).unwrap();
    let result = admit(&f.registry, &f.tokens, registration(&token.token, "K"), None, 10_000);
    assert!(matches!(result, Err(AdmissionReject::Token(TokenError::Expired))));
}

#[test]
fn pinned_api_address_binds_to_record() {
    let f = fixture();
    let token = f.tokens.create(1_000, 3600, Some("pin.internal:9999".to_string())).unwrap();
    let admission =
        admit(&f.registry, &f.tokens, registration(&token.token, "K"), None, 2_000).unwrap();
    let record = f.registry.get(&admission.agent_id).unwrap();
    assert_eq!(record.pinned_api_address.as_deref(), Some("pin.internal:9999"));
    assert_eq!(record.api_address().unwrap(), "pin.internal:9999");
}

#[test]
fn reconnection_with_valid_signature_admits() {
    let f = fixture();
    let (signing_key, pem) = keypair();
    let token = f.tokens.create(1_000, 3600, None).unwrap();
    let admission =
        admit(&f.registry, &f.tokens, registration(&token.token, &pem), None, 2_000).unwrap();
    let agent_id = admission.agent_id;
    f.registry.mark_offline(&agent_id).unwrap();

    let timestamp_ms = 50_000;
    let payload = wire_auth::reconnect_payload(&agent_id, timestamp_ms);
    let signature = base64::engine::general_purpose::STANDARD
        .encode(signing_key.sign(payload.as_bytes()).to_bytes());

    let readmitted = admit(
        &f.registry,
        &f.tokens,
        AgentMessage::Reconnection {
            agent_id: agent_id.clone(),
            timestamp_ms,
            signature,
            api_port: None,
        },
        Some("10.0.0.10".to_string()),
        51_000,
    )
    .unwrap();

    assert!(!readmitted.newly_registered);
    assert!(readmitted.reply.is_none());
    let record = f.registry.get(&agent_id).unwrap();
    assert_eq!(record.status, AgentStatus::Online);
    assert_eq!(record.observed_ip.as_deref(), Some("10.0.0.10"));
}

#[test]
fn reconnection_with_wrong_key_rejected_without_mutation() {
    let f = fixture();
    let (_, pem) = keypair();
    let (other_key, _) = keypair();
    let token = f.tokens.create(1_000, 3600, None).unwrap();
    let admission =
        admit(&f.registry, &f.tokens, registration(&token.token, &pem), None, 2_000).unwrap();
    let agent_id = admission.agent_id;
    f.registry.mark_offline(&agent_id).unwrap();

    let payload = wire_auth::reconnect_payload(&agent_id, 50_000);
    let signature = base64::engine::general_purpose::STANDARD
        .encode(other_key.sign(payload.as_bytes()).to_bytes());

    let result = admit(
        &f.registry,
        &f.tokens,
        AgentMessage::Reconnection { agent_id: agent_id.clone(), timestamp_ms: 50_000, signature, api_port: None },
        None,
        51_000,
    );
    assert!(matches!(result, Err(AdmissionReject::Credential(AuthError::BadSignature))));
    assert_eq!(f.registry.get(&agent_id).unwrap().status, AgentStatus::Offline);
}

#[test]
fn reconnection_for_unknown_id_rejected() {
    let f = fixture();
    let result = admit(
        &f.registry,
        &f.tokens,
        AgentMessage::Reconnection {
            agent_id: AgentId::new("ghost"),
            timestamp_ms: 1,
            signature: "AAAA".to_string(),
            api_port: None,
        },
        None,
        1,
    );
    assert!(matches!(result, Err(AdmissionReject::UnknownAgent)));
}

#[test]
fn non_handshake_first_frame_rejected() {
    let f = fixture();
    let result =
        admit(&f.registry, &f.tokens, AgentMessage::Heartbeat { seq: None }, None, 1);
    assert!(matches!(result, Err(AdmissionReject::Protocol)));
}

#[tokio::test]
async fn send_command_fails_synchronously_when_offline() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(Registry::open(dir.path().join("registry.json")).unwrap());
    let tokens = Arc::new(TokenService::open(dir.path().join("tokens.json")).unwrap());
    let alerts = Arc::new(AlertSink::open(dir.path().join("alerts.json")).unwrap());
    let store = Arc::new(ConfigStore::new(dir.path().join("repo"), Duration::from_secs(10)));
    let hub = Hub::new(registry, tokens, alerts, store, DEFAULT_HEARTBEAT);

    let result = hub.send_command(&AgentId::new("A1"), Command::GitPull);
    assert!(matches!(result, Err(HubError::NotConnected(_))));
    assert!(!hub.is_connected(&AgentId::new("A1")));
    assert_eq!(hub.connected_count(), 0);
}
