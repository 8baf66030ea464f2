#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the HTTP enqueue endpoint's bearer-auth gate and
//! the dispatcher's admission behaviour, driven through the real router.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use relaygate_auth::AuthVerifier;
use relaygate_bus::{BusClient, Handler, Subscription};
use relaygate_cache::SessionCache;
use relaygate_dispatcher::{Dispatcher, DispatcherConfig};
use relaygate_gateway::{AppState, GatewayState, build_router};
use relaygate_protocol::HotBufferEntry;
use secrecy::SecretString;
use serde::Serialize;
use tokio::net::TcpListener;

const TEST_SECRET: &str = "integration-test-secret";

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(rename = "type")]
    typ: String,
    jti: String,
}

fn bearer_token(subject: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub: subject.to_string(),
        iat: now,
        exp: now + 3600,
        typ: "access".to_string(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// A bus that never delivers a reply, so a dispatch stays admitted until the
/// test's idle timeout — enough to exercise conflict detection without a
/// real NATS instance.
struct SilentBus;

#[async_trait]
impl BusClient for SilentBus {
    async fn publish(&self, _: &str, _: Vec<u8>, _: HashMap<String, String>) -> relaygate_bus::Result<()> {
        Ok(())
    }

    async fn subscribe(&self, subject: &str, _: Handler) -> relaygate_bus::Result<Subscription> {
        Ok(Subscription::noop(subject))
    }

    async fn unsubscribe(&self, _: Subscription) -> relaygate_bus::Result<()> {
        Ok(())
    }

    async fn publish_stream(&self, _: &str, _: Vec<u8>) -> relaygate_bus::Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct NoopCache;

#[async_trait]
impl SessionCache for NoopCache {
    async fn append_chunk(&self, _: &str, _: &HotBufferEntry) -> relaygate_cache::Result<()> {
        Ok(())
    }
    async fn read_recent(&self, _: &str, _: usize) -> relaygate_cache::Result<Vec<HotBufferEntry>> {
        Ok(vec![])
    }
    async fn get_user_key(&self, _: &str, _: &str) -> relaygate_cache::Result<Option<String>> {
        Ok(None)
    }
    async fn set_user_key(&self, _: &str, _: &str, _: &str) -> relaygate_cache::Result<()> {
        Ok(())
    }
    async fn is_revoked(&self, _: &str) -> relaygate_cache::Result<bool> {
        Ok(false)
    }
    async fn health_check(&self) -> relaygate_cache::Result<()> {
        Ok(())
    }
}

async fn start_server() -> SocketAddr {
    let cache: Arc<dyn SessionCache> = Arc::new(NoopCache);
    let bus: Arc<dyn BusClient> = Arc::new(SilentBus);
    let auth = Arc::new(AuthVerifier::new(
        &SecretString::from(TEST_SECRET.to_string()),
        Algorithm::HS256,
        Arc::clone(&cache),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&bus),
        Arc::clone(&cache),
        DispatcherConfig {
            idle_chunk_timeout: Duration::from_secs(30),
            total_ticket_timeout: Duration::from_secs(60),
            ..DispatcherConfig::default()
        },
    ));
    let gateway = GatewayState::new(
        bus,
        cache,
        auth,
        dispatcher,
        "/stream".to_string(),
        Duration::from_secs(30),
    );
    let app = build_router(AppState { gateway });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

#[tokio::test]
async fn health_is_public() {
    let addr = start_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn chat_without_bearer_token_returns_401() {
    let addr = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&serde_json::json!({ "room_id": "conv-1", "msg": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn chat_with_malformed_bearer_token_returns_401() {
    let addr = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .header("Authorization", "Bearer not-a-jwt")
        .json(&serde_json::json!({ "room_id": "conv-1", "msg": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn chat_with_valid_bearer_token_is_queued() {
    let addr = start_server().await;
    let token = bearer_token("user-1");

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&serde_json::json!({ "room_id": "conv-1", "msg": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "queued");
    assert!(body["id"].is_string());
}

#[tokio::test]
async fn chat_with_empty_message_returns_400() {
    let addr = start_server().await;
    let token = bearer_token("user-1");

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&serde_json::json!({ "room_id": "conv-1", "msg": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

/// A second request for the same (owner, conversation) while the first is
/// still admitted (its ticket never completes, since `SilentBus` never
/// delivers a reply) must be rejected as a conflict (`SPEC_FULL.md` §8).
#[tokio::test]
async fn second_concurrent_request_for_same_conversation_conflicts() {
    let addr = start_server().await;
    let token = bearer_token("user-1");
    let client = reqwest::Client::new();

    let first = client
        .post(format!("http://{addr}/chat"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&serde_json::json!({ "room_id": "conv-conflict", "msg": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .post(format!("http://{addr}/chat"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&serde_json::json!({ "room_id": "conv-conflict", "msg": "again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
}
