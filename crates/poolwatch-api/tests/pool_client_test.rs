// Integration tests for `PoolClient` using wiremock.

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use poolwatch_api::{Error, PoolClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, PoolClient) {
    let server = MockServer::start().await;
    let client =
        PoolClient::from_reqwest(server.uri().parse().unwrap(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_pool_overview() {
    let (server, client) = setup().await;

    let body = json!({
        "hashrate": 1.25e15,
        "miners": 412,
        "workers": 1033,
        "lastBlockFound": 1_739_000_000_000_i64
    });

    Mock::given(method("GET"))
        .and(path("/api/pool/overview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let overview = client.pool_overview().await.unwrap();
    assert_eq!(overview["miners"], 412);
    assert_eq!(overview["workers"], 1033);
}

#[tokio::test]
async fn test_pool_blocks_list() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/pool/blocks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "epoch": 99 }, { "epoch": 98 }])),
        )
        .mount(&server)
        .await;

    let blocks = client.pool_blocks().await.unwrap();
    assert_eq!(blocks.as_array().unwrap().len(), 2);
    assert_eq!(blocks[0]["epoch"], 99);
}

#[tokio::test]
async fn test_miner_scoped_paths() {
    let (server, client) = setup().await;
    let address = "kaspa:qr0abc.rig01";

    for (suffix, marker) in [
        ("", "profile"),
        ("/shares", "shares"),
        ("/shares/chart", "shares-chart"),
        ("/payments", "payments"),
        ("/rewards", "rewards"),
        ("/rewards/chart", "rewards-chart"),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/api/miners/{address}{suffix}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": marker })))
            .expect(1)
            .mount(&server)
            .await;
    }

    assert_eq!(client.miner(address).await.unwrap()["kind"], "profile");
    assert_eq!(client.miner_shares(address).await.unwrap()["kind"], "shares");
    assert_eq!(
        client.miner_shares_chart(address).await.unwrap()["kind"],
        "shares-chart"
    );
    assert_eq!(client.miner_payments(address).await.unwrap()["kind"], "payments");
    assert_eq!(client.miner_rewards(address).await.unwrap()["kind"], "rewards");
    assert_eq!(
        client.miner_rewards_chart(address).await.unwrap()["kind"],
        "rewards-chart"
    );
}

#[tokio::test]
async fn test_pool_wide_paths() {
    let (server, client) = setup().await;

    for (p, marker) in [
        ("/api/miners", "miners"),
        ("/api/pool/payments", "payments"),
        ("/api/pool/network", "network"),
        ("/api/pool/stats/24h", "stats"),
    ] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": marker })))
            .mount(&server)
            .await;
    }

    assert_eq!(client.miners().await.unwrap()["kind"], "miners");
    assert_eq!(client.pool_payments().await.unwrap()["kind"], "payments");
    assert_eq!(client.network_info().await.unwrap()["kind"], "network");
    assert_eq!(client.pool_stats_24h().await.unwrap()["kind"], "stats");
}

#[tokio::test]
async fn test_update_account_settings_sends_bearer_token() {
    let (server, client) = setup().await;
    let settings = json!({ "payoutThreshold": 100 });

    Mock::given(method("POST"))
        .and(path("/api/account/settings"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_json(&settings))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let token = SecretString::from("s3cret".to_owned());
    let resp = client.update_account_settings(&token, &settings).await.unwrap();
    assert_eq!(resp["ok"], true);
}

#[tokio::test]
async fn test_empty_body_is_null() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/pool/network"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(client.network_info().await.unwrap().is_null());
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_not_found_maps_to_http_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/miners/unknown"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": "miner not found" })),
        )
        .mount(&server)
        .await;

    let err = client.miner("unknown").await.unwrap_err();
    assert!(err.is_not_found());
    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "miner not found");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_token_maps_to_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/account/settings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .mount(&server)
        .await;

    let token = SecretString::from("stale".to_owned());
    let err = client
        .update_account_settings(&token, &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized { ref message } if message == "expired"));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/pool/overview"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client.pool_overview().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/pool/overview"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = client.pool_overview().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { ref body, .. } if body == "{not json"));
}
