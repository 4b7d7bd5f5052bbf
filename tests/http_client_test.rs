//! HTTP client tests against a mock aria2 endpoint.

use aria2_rpc::{Aria2, ClientOptions, HttpClient, RpcError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, options: ClientOptions) -> HttpClient {
    HttpClient::new(format!("{}/jsonrpc", server.uri()), options).unwrap()
}

#[tokio::test]
async fn test_get_version_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "method": "aria2.getVersion",
            "params": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "jsonrpc": "2.0",
            "result": {"version": "1.36.0", "enabledFeatures": ["HTTPS"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ClientOptions::default());
    let version = client.get_version().await.unwrap();
    assert_eq!(version.version, "1.36.0");
}

#[tokio::test]
async fn test_token_sent_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "aria2.addUri",
            "params": ["token:secret", ["http://x"]]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "jsonrpc": "2.0",
            "result": "2089b05ecca3d829"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, ClientOptions::default().secret("secret"));
    let gid = client.add_uri(&["http://x"], None, None).await.unwrap();
    assert_eq!(gid, "2089b05ecca3d829");
}

#[tokio::test]
async fn test_error_body_on_400_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "id": "1",
            "jsonrpc": "2.0",
            "error": {"code": 1, "message": "Unauthorized"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, ClientOptions::default());
    match client.call("aria2.getGlobalStat", vec![]).await {
        Err(RpcError::Remote(err)) => {
            assert_eq!(err.code, 1);
            assert_eq!(err.message, "Unauthorized");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_error_page_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server, ClientOptions::default());
    let err = client.call("aria2.getGlobalStat", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(ref msg) if msg.contains("502")));
}

#[tokio::test]
async fn test_ids_increase_per_call() {
    let server = MockServer::start().await;
    for id in ["1", "2"] {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"id": id})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "jsonrpc": "2.0",
                "result": "OK"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = client_for(&server, ClientOptions::default());
    client.pause_all().await.unwrap();
    client.unpause_all().await.unwrap();
}
