//! End-to-end tests of single requests over real HTTP.
//!
//! A wiremock server stands in for the site; the client uses the bundled
//! reqwest transport.

use serde_json::{json, Value};
use sprest_core::{
    ODataDefaultParser, RequestOptions, ResourceAddress, RetryConfig, RuntimeConfig, SpRestClient,
    SpRestError, TextParser,
};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context_info(digest: &str, timeout_secs: i64) -> Value {
    json!({
        "d": {
            "GetContextWebInformation": {
                "FormDigestValue": digest,
                "FormDigestTimeoutSeconds": timeout_secs,
                "WebFullUrl": "/sites/dev"
            }
        }
    })
}

fn site(server: &MockServer) -> String {
    format!("{}/sites/dev", server.uri())
}

fn client(config: RuntimeConfig) -> SpRestClient {
    SpRestClient::new(config).expect("Failed to build client")
}

#[tokio::test]
async fn test_get_sends_odata_headers_and_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web/lists"))
        .and(query_param("$select", "Title,Id"))
        .and(query_param("$top", "2"))
        .and(header("Accept", "application/json"))
        .and(header("X-Custom", "global"))
        .and(header_exists("X-ClientService-ClientTag"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [{ "Title": "Documents" }, { "Title": "Tasks" }] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new().with_header("X-Custom", "global"));
    let address = ResourceAddress::new(&site(&server), "_api/web/lists")
        .select(&["Title", "Id"])
        .top(2);

    let value = client
        .request(&address, ODataDefaultParser::<Value>::new())
        .issue()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(value[0]["Title"], "Documents");
    assert_eq!(value[1]["Title"], "Tasks");
}

#[tokio::test]
async fn test_relative_address_uses_base_url() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web/title"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Dev site"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new().with_base_url(site(&server)));
    let text = client
        .request(&ResourceAddress::parse("_api/web/title"), TextParser)
        .issue()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(text, "Dev site");
}

#[tokio::test]
async fn test_post_fetches_digest_first() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/contextinfo"))
        .and(header("Accept", "application/json;odata=verbose"))
        .respond_with(ResponseTemplate::new(200).set_body_json(context_info("0xABC", 1800)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/web/lists"))
        .and(header("X-RequestDigest", "0xABC"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "d": { "Id": 7 } })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let address = ResourceAddress::new(&site(&server), "_api/web/lists");

    for _ in 0..2 {
        let value = client
            .request(&address, ODataDefaultParser::<Value>::new())
            .method(reqwest::Method::POST)
            .options(RequestOptions::new().with_body(r#"{"Title":"New"}"#))
            .issue()
            .unwrap()
            .await
            .unwrap();
        assert_eq!(value["Id"], 7);
    }
}

#[tokio::test]
async fn test_expired_digest_is_refreshed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/contextinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(context_info("0xSHORT", 1)))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let url = format!("{}/_api/web", site(&server));

    assert_eq!(client.get_credential(&url).await.unwrap(), "0xSHORT");
    assert_eq!(client.get_credential(&url).await.unwrap(), "0xSHORT");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.get_credential(&url).await.unwrap(), "0xSHORT");
}

#[tokio::test]
async fn test_zero_digest_timeout_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/contextinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(context_info("0xZERO", 0)))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let url = format!("{}/_api/web", site(&server));

    let err = client.get_credential(&url).await.unwrap_err();
    assert!(matches!(err, SpRestError::ContextInfo { .. }));
    assert!(client.get_credential(&url).await.is_err());
}

#[tokio::test]
async fn test_concurrent_credential_requests_share_one_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/contextinfo"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(context_info("0xONE", 1800))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let url = format!("{}/_api/web/lists", site(&server));

    let results =
        futures::future::join_all((0..5).map(|_| client.get_credential(&url))).await;

    for result in results {
        assert_eq!(result.unwrap(), "0xONE");
    }
}

#[tokio::test]
async fn test_failed_context_info_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/sites/dev/_api/contextinfo"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let err = client
        .get_credential(&format!("{}/_api/web", site(&server)))
        .await
        .unwrap_err();

    assert!(matches!(err, SpRestError::ContextInfo { .. }));
}

#[tokio::test]
async fn test_throttled_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "d": { "Title": "Dev" } })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let started = Instant::now();
    let value = client
        .request(
            &ResourceAddress::new(&site(&server), "_api/web"),
            ODataDefaultParser::<Value>::new(),
        )
        .issue()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(value["Title"], "Dev");
    // 100ms then 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web/lists/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(RuntimeConfig::new());
    let err = client
        .request(
            &ResourceAddress::new(&site(&server), "_api/web/lists/missing"),
            ODataDefaultParser::<Value>::new(),
        )
        .issue()
        .unwrap()
        .await
        .unwrap_err();

    match err {
        SpRestError::Http {
            status, response, ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(response.text().unwrap(), "nope");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_ceiling_surfaces_last_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sites/dev/_api/web"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let retry = RetryConfig::new()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(5));
    let client = client(RuntimeConfig::new().with_retry(retry));

    let err = client
        .request(
            &ResourceAddress::new(&site(&server), "_api/web"),
            ODataDefaultParser::<Value>::new(),
        )
        .issue()
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(429));
}
