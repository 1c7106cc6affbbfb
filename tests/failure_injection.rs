//! Failure injection tests for the engine gateway.

use std::time::Duration;

use serde_json::{json, Value};

mod common;

use common::{http_client, start_gateway, test_config, MockEngine, Reply};

#[tokio::test]
async fn test_retry_on_transient_failure() {
    let engine = MockEngine::start(|_, index, payload| {
        if index < 2 {
            Reply::error(503, "UNAVAILABLE", "warming up")
        } else {
            Reply::ok(json!({ "symbol": payload["symbol"], "price": 189.5 }))
        }
    })
    .await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/api/v1/market-data/aapl"))
        .send()
        .await
        .expect("Gateway unreachable");

    assert_eq!(res.status(), 200, "Should succeed after retries");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["symbol"], "AAPL");
    assert_eq!(engine.calls(), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let engine =
        MockEngine::start(|_, _, _| Reply::error(400, "INVALID_ARGUMENT", "unknown symbol")).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/api/v1/market-data/ZZZZ"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "permanent");
    assert_eq!(body["code"], 400);
    assert_eq!(body["retryable"], false);
    assert_eq!(body["service"], "market_data");
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_breaker_opens_and_rejects_without_engine_calls() {
    let engine = MockEngine::start(|_, _, _| Reply::error(503, "UNAVAILABLE", "down")).await;
    let mut config = test_config(&engine.endpoint());
    config.resilience.max_failures = 2;
    config.resilience.max_retries = 0;
    config.resilience.reset_timeout_ms = 60_000;
    let gateway = start_gateway(config).await;
    let client = http_client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/api/v1/stats")).send().await.unwrap();
        assert_eq!(res.status(), 503);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "transient");
    }
    assert_eq!(engine.calls(), 2);

    let res = client.get(gateway.url("/api/v1/stats")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");
    assert_eq!(body["retryable"], true);
    assert_eq!(engine.calls(), 2, "Open breaker must not reach the engine");

    // Other dependencies keep their own breakers.
    let res = client.get(gateway.url("/api/v1/buffers")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "transient");
    assert_eq!(engine.calls(), 3);

    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let health: Value = res.json().await.unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_unreachable_engine() {
    // Nothing listens on the discard port.
    let gateway = start_gateway(test_config("http://127.0.0.1:9")).await;

    let res = http_client()
        .get(gateway.url("/api/v1/buffers"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["service"], "buffers");
    assert_eq!(body["retryable"], true);
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_slow_engine_hits_deadline() {
    let engine = MockEngine::start(|_, _, _| {
        Reply::ok(json!({ "late": true })).delayed(Duration::from_secs(3))
    })
    .await;
    let mut config = test_config(&engine.endpoint());
    config.resilience.deadline_ms = 200;
    let gateway = start_gateway(config).await;

    let started = std::time::Instant::now();
    let res = http_client()
        .get(gateway.url("/api/v1/news/MSFT"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 408);
    assert!(started.elapsed() < Duration::from_secs(2));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "cancellation");
    assert_eq!(body["service"], "news");
}

#[tokio::test]
async fn test_invalid_input_never_reaches_engine() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;
    let client = http_client();

    let res = client
        .get(gateway.url("/api/v1/market-data/WAY-TOO-LONG-SYMBOL"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "permanent");
    assert_eq!(body["service"], "market_data");

    let res = client
        .get(gateway.url("/api/v1/news/AAPL?limit=500"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_news_forwards_limit() {
    let engine = MockEngine::start(|method, _, payload| {
        Reply::ok(json!({ "method": method, "limit": payload["limit"] }))
    })
    .await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;
    let client = http_client();

    let res = client
        .get(gateway.url("/api/v1/news/tsla?limit=5"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["method"], "FetchNews");
    assert_eq!(body["data"]["limit"], 5);

    let res = client.get(gateway.url("/api/v1/news/tsla")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["limit"], 20);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let engine = MockEngine::fixed(json!({ "ok": true })).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/api/v1/stats"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-request-id"], "req-42");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["request_id"], "req-42");
}

#[tokio::test]
async fn test_unknown_route() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/api/v2/nothing"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_admin_auth_and_breaker_reset() {
    let engine = MockEngine::start(|_, _, _| Reply::error(503, "UNAVAILABLE", "down")).await;
    let mut config = test_config(&engine.endpoint());
    config.resilience.max_failures = 1;
    config.resilience.max_retries = 0;
    config.resilience.reset_timeout_ms = 60_000;
    config.admin.enabled = true;
    config.admin.api_key = "secret".to_string();
    let gateway = start_gateway(config).await;
    let client = http_client();

    let res = client.get(gateway.url("/admin/breakers")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(gateway.url("/admin/breakers"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    // Trip the market data breaker.
    let _ = client
        .get(gateway.url("/api/v1/market-data/AAPL"))
        .send()
        .await
        .unwrap();

    let res = client
        .get(gateway.url("/admin/breakers"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let breakers: Vec<Value> = res.json().await.unwrap();
    assert_eq!(breakers.len(), 4);
    let market = breakers.iter().find(|b| b["name"] == "market_data").unwrap();
    assert_eq!(market["state"], "open");

    let res = client
        .post(gateway.url("/admin/breakers/market_data/reset"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let snapshot: Value = res.json().await.unwrap();
    assert_eq!(snapshot["state"], "closed");

    let res = client
        .post(gateway.url("/admin/breakers/nope/reset"))
        .bearer_auth("secret")
        .header("x-request-id", "ops-7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["request_id"], "ops-7");
}

#[tokio::test]
async fn test_admin_disabled_by_default() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/admin/status"))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

async fn assert_envelope(res: reqwest::Response, status: u16) -> Value {
    assert_eq!(res.status(), status);
    assert_eq!(res.headers()["content-type"], "application/json");
    let body: Value = res.json().await.expect("body is not a JSON envelope");
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], status);
    assert_eq!(body["retryable"], false);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(body["timestamp"].as_str().is_some());
    body
}

#[tokio::test]
async fn test_wrong_method_gets_envelope() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .post(gateway.url("/api/v1/stats"))
        .header("x-request-id", "req-405")
        .send()
        .await
        .unwrap();

    let body = assert_envelope(res, 405).await;
    assert_eq!(body["error"], "permanent");
    assert_eq!(body["request_id"], "req-405");
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_malformed_path_segment_gets_envelope() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/api/v1/market-data/%FF"))
        .send()
        .await
        .unwrap();

    let body = assert_envelope(res, 400).await;
    assert_eq!(body["error"], "permanent");
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_plain_request_to_websocket_route_gets_envelope() {
    let engine = MockEngine::fixed(json!({})).await;
    let gateway = start_gateway(test_config(&engine.endpoint())).await;

    let res = http_client()
        .get(gateway.url("/ws"))
        .header("x-request-id", "req-ws")
        .send()
        .await
        .unwrap();

    let status = res.status().as_u16();
    assert!((400..500).contains(&status));
    let body = assert_envelope(res, status).await;
    assert_eq!(body["request_id"], "req-ws");
}
