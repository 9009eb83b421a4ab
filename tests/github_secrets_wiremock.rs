use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clawmon::error::RotateError;
use clawmon::secrets::{GithubSecretStore, SecretStore};
use crypto_box::aead::OsRng;
use crypto_box::SecretKey;
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "octo/monitor";

fn store(server: &MockServer) -> Result<GithubSecretStore> {
    Ok(GithubSecretStore::new(
        Some(SecretString::from("ghp_test")),
        Some(REPO.to_string()),
    )?
    .with_api_base(server.uri()))
}

async fn mount_public_key(server: &MockServer, key: &SecretKey) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{REPO}/actions/secrets/public-key")))
        .and(header("authorization", "token ghp_test"))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key_id": "568250167242549743",
            "key": BASE64.encode(key.public_key().as_bytes()),
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn rotate_publishes_value_sealed_for_repo_key() -> Result<()> {
    let server = MockServer::start().await;
    let repo_key = SecretKey::generate(&mut OsRng);
    mount_public_key(&server, &repo_key).await;

    Mock::given(method("PUT"))
        .and(path(format!("/repos/{REPO}/actions/secrets/GH_SESSION")))
        .and(header("authorization", "token ghp_test"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)?
        .rotate("GH_SESSION", &SecretString::from("live-session-value"))
        .await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .expect("PUT request");
    let body: Value = serde_json::from_slice(&put.body)?;
    assert_eq!(body["key_id"], "568250167242549743");

    let encrypted = body["encrypted_value"].as_str().expect("encrypted_value");
    assert!(!encrypted.contains("live-session-value"));
    let sealed = BASE64.decode(encrypted)?;
    let opened = repo_key.unseal(&sealed).expect("sealed for the repo key");
    assert_eq!(opened, b"live-session-value");
    Ok(())
}

#[tokio::test]
async fn stale_key_id_is_a_rejected_publish() -> Result<()> {
    let server = MockServer::start().await;
    let repo_key = SecretKey::generate(&mut OsRng);
    mount_public_key(&server, &repo_key).await;

    Mock::given(method("PUT"))
        .and(path(format!("/repos/{REPO}/actions/secrets/GH_SESSION")))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Bad key id",
        })))
        .mount(&server)
        .await;

    let result = store(&server)?
        .rotate("GH_SESSION", &SecretString::from("v"))
        .await;

    assert!(matches!(result, Err(RotateError::Rejected { status: 422 })));
    Ok(())
}

#[tokio::test]
async fn unreadable_public_key_stops_before_publish() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{REPO}/actions/secrets/public-key")))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = store(&server)?
        .rotate("GH_SESSION", &SecretString::from("v"))
        .await;

    assert!(matches!(result, Err(RotateError::PublicKey(_))));
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| r.method.as_str() != "PUT"));
    Ok(())
}

#[tokio::test]
async fn unconfigured_store_makes_no_requests() -> Result<()> {
    let server = MockServer::start().await;

    for (token, repo) in [
        (None, Some(REPO.to_string())),
        (Some(SecretString::from("ghp_test")), None),
    ] {
        let store = GithubSecretStore::new(token, repo)?.with_api_base(server.uri());
        let result = store.rotate("GH_SESSION", &SecretString::from("v")).await;
        assert!(matches!(result, Err(RotateError::NotConfigured)));
    }

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "expected no HTTP requests");
    Ok(())
}
