//! Pool behavior under concurrency and restarts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbar_oauth::OAuthClient;
use crossbar_pool::{Account, AccountPool, Credentials, Selection};
use crossbar_types::ModelFamily;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn oauth_account(id: &str, expires_in: chrono::Duration) -> Account {
    Account::new(
        id,
        Some(format!("{id}@example.com")),
        Credentials::OAuth {
            refresh_token: format!("rt-{id}"),
            access_token: Some(format!("at-{id}")),
            expires_at: Some(Utc::now() + expires_in),
        },
        Utc::now(),
    )
}

fn test_oauth_client(token_url: &str) -> OAuthClient {
    OAuthClient::new(
        "client-test",
        "https://example.com/authorize",
        token_url,
        "openid",
        Vec::new(),
        7878,
    )
}

/// N concurrent selects against K available tokens: exactly K selections
/// succeed, every other call gets a positive wait.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selection_splits_exactly_the_available_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(AccountPool::load(
        ModelFamily::Codex,
        dir.path().join("codex.json"),
    ));
    pool.add_account(oauth_account("solo", chrono::Duration::hours(1)))
        .await;

    // One fresh account holds exactly 50 bucket tokens.
    let mut handles = Vec::new();
    for _ in 0..60 {
        let pool = pool.clone();
        handles.push(tokio::spawn(
            async move { pool.select("gpt-5.1-codex").await },
        ));
    }

    let mut selected = 0usize;
    let mut waits = 0usize;
    for handle in handles {
        match handle.await.unwrap() {
            Selection::Selected(_) => selected += 1,
            Selection::Wait(wait) => {
                assert!(wait > Duration::ZERO, "losers must learn a real wait");
                waits += 1;
            }
            Selection::NoneUsable => panic!("account can recover; NoneUsable is wrong"),
        }
    }

    assert_eq!(selected, 50, "exactly the available tokens may win");
    assert_eq!(waits, 10);
}

/// Four concurrent requests against one expiring account issue a single
/// refresh grant; all four observe the new access token.
#[tokio::test]
async fn concurrent_token_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-refreshed",
            "refresh_token": "rt-rotated",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(AccountPool::load(
        ModelFamily::CloudCode,
        dir.path().join("cloud-code.json"),
    ));
    // Expires within the 5-minute margin, so the first caller refreshes.
    pool.add_account(oauth_account("a", chrono::Duration::seconds(60)))
        .await;

    let oauth = Arc::new(test_oauth_client(&format!("{}/token", server.uri())));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let oauth = oauth.clone();
        handles.push(tokio::spawn(
            async move { pool.token_for("a", &oauth).await },
        ));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "at-refreshed");
    }
}

/// A rejected refresh latches the account invalid.
#[tokio::test]
async fn rejected_refresh_marks_the_account_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid_grant\"}"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = AccountPool::load(ModelFamily::CloudCode, dir.path().join("cloud-code.json"));
    pool.add_account(oauth_account("a", chrono::Duration::seconds(10)))
        .await;

    let oauth = test_oauth_client(&format!("{}/token", server.uri()));
    assert!(pool.token_for("a", &oauth).await.is_err());

    assert!(matches!(
        pool.select("claude-sonnet-4-5").await,
        Selection::NoneUsable
    ));
}

/// Lifecycle flags survive a restart through the persisted file.
#[tokio::test]
async fn invalid_latch_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codex.json");

    {
        let pool = AccountPool::load(ModelFamily::Codex, path.clone());
        pool.add_account(oauth_account("dead", chrono::Duration::hours(1)))
            .await;
        pool.add_account(oauth_account("alive", chrono::Duration::hours(1)))
            .await;
        pool.mark_invalid("dead", "401 from backend").await;

        // Wait for the writer task to land the snapshot.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let raw = std::fs::read_to_string(&path).unwrap_or_default();
            if raw.contains("\"isInvalid\": true") {
                break;
            }
        }
    }

    let reloaded = AccountPool::load(ModelFamily::Codex, path);
    match reloaded.select("gpt-5.1-codex").await {
        Selection::Selected(account) => assert_eq!(account.id, "alive"),
        other => panic!("expected the surviving account, got {other:?}"),
    }
    let snapshot = reloaded.snapshot().await;
    let dead = snapshot
        .accounts
        .iter()
        .find(|account| account.id == "dead")
        .unwrap();
    assert_eq!(
        dead.invalid_reason.as_deref(),
        Some("401 from backend"),
        "the latch and its reason persist"
    );
}
