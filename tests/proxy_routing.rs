// End-to-end forwarding through a running gateway
mod common;

use std::sync::Arc;

use canopy::{Gateway, config::ApiDefinition};
use common::{api, spawn_backend, write_api, write_gateway_config};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tempfile::tempdir;

async fn get_json(url: String) -> (StatusCode, Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_suffix_and_query_are_forwarded() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "orders.json", &api("orders", "/orders", &backend.url()));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let (status, body) = get_json(format!("http://{addr}/orders/123?x=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/123");
    assert_eq!(body["query"], "x=1");
    assert_eq!(body["host"], backend.addr.to_string());
    assert_eq!(body["xForwardedFor"], "127.0.0.1");

    // Bare mount point maps onto the target root
    let (status, body) = get_json(format!("http://{addr}/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/");

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unmatched_path_is_not_found() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "orders.json", &api("orders", "/orders", &backend.url()));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let (status, body) = get_json(format!("http://{addr}/ordersx/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
    assert_eq!(backend.hits(), 0);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interceptors_decorate_both_directions() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("orders", "/orders", &backend.url());
    definition["proxy"]["interceptor"] = json!({
        "request": [{"name": "addHeader", "header": "X-Test", "value": "decorated"}],
        "response": [{"name": "addHeader", "header": "X-Gateway", "value": "canopy"}]
    });
    write_api(dir.path(), "orders.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let response = reqwest::get(format!("http://{addr}/orders/1")).await.unwrap();
    assert_eq!(response.headers()["x-gateway"], "canopy");
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["xTest"], "decorated");
    assert!(body["requestId"].is_string());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filter_rejection_never_reaches_backend() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("orders", "/orders", &backend.url());
    definition["proxy"]["filter"] = json!([
        {"name": "ipFilter", "blacklist": ["127.0.0.0/8"]}
    ]);
    write_api(dir.path(), "orders.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let response = reqwest::get(format!("http://{addr}/orders/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(backend.hits(), 0);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_backend_times_out() {
    let backend = spawn_backend("slow").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("sleepy", "/sleepy", &backend.url());
    definition["proxy"]["timeout"] = json!("200ms");
    write_api(dir.path(), "sleepy.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let started = std::time::Instant::now();
    let response = reqwest::get(format!("http://{addr}/sleepy/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_backend_is_bad_gateway() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let target = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "gone.json", &api("gone", "/gone", &target));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let response = reqwest::get(format!("http://{addr}/gone/x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_definitions_are_skipped() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "orders.json", &api("orders", "/orders", &backend.url()));
    std::fs::write(dir.path().join("apis/broken.json"), "{ not json").unwrap();
    // Parses, but fails schema validation
    write_api(dir.path(), "ftp.json", &api("ftp", "/ftp", "ftp://files.local"));
    // Validates, but names an unknown filter kind
    let mut unknown = api("odd", "/odd", &backend.url());
    unknown["proxy"]["filter"] = json!([{"name": "noSuchFilter"}]);
    write_api(dir.path(), "odd.json", &unknown);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    assert_eq!(gateway.apis().len(), 1);
    assert!(gateway.api("orders_default").is_some());
    let (status, _) = get_json(format!("http://{addr}/orders/1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get_json(format!("http://{addr}/odd/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_longest_public_path_wins() {
    let general = spawn_backend("general").await;
    let special = spawn_backend("special").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "api.json", &api("api", "/api", &general.url()));
    write_api(dir.path(), "api-v2.json", &api("api-v2", "/api/v2", &special.url()));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let (_, body) = get_json(format!("http://{addr}/api/v2/items")).await;
    assert_eq!(body["backend"], "special");
    assert_eq!(body["path"], "/items");
    let (_, body) = get_json(format!("http://{addr}/api/v1/items")).await;
    assert_eq!(body["backend"], "general");
    assert_eq!(body["path"], "/v1/items");

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reregistration_replaces_target() {
    let old = spawn_backend("old").await;
    let new = spawn_backend("new").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "orders.json", &api("orders", "/orders", &old.url()));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let (_, body) = get_json(format!("http://{addr}/orders/1")).await;
    assert_eq!(body["backend"], "old");

    let replacement: ApiDefinition =
        serde_json::from_value(api("orders", "/orders", &new.url())).unwrap();
    let key = gateway.register_api(replacement).unwrap();
    assert_eq!(key, "orders_default");
    assert_eq!(gateway.apis().len(), 1);

    let (_, body) = get_json(format!("http://{addr}/orders/1")).await;
    assert_eq!(body["backend"], "new");

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_registrations_all_land() {
    let backend = spawn_backend("shared").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));

    let gateway = Arc::new(Gateway::new(config));
    let addr = gateway.start().await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let gateway = gateway.clone();
            let definition: ApiDefinition =
                serde_json::from_value(api(&format!("svc{i}"), &format!("/svc{i}"), &backend.url()))
                    .unwrap();
            tokio::spawn(async move { gateway.register_api(definition) })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(gateway.apis().len(), 16);
    for i in 0..16 {
        let (status, body) = get_json(format!("http://{addr}/svc{i}/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["path"], "/ping");
    }

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_throttling_rejects_excess_requests() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("orders", "/orders", &backend.url());
    definition["throttling"] = json!({"max": 2, "timeWindow": "1m"});
    write_api(dir.path(), "orders.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    for _ in 0..2 {
        let response = reqwest::get(format!("http://{addr}/orders/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = reqwest::get(format!("http://{addr}/orders/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(backend.hits(), 2);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_api_key_authentication() {
    let backend = spawn_backend("orders").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("orders", "/orders", &backend.url());
    definition["authentication"] = json!({"strategy": "apiKey", "keys": ["s3cret"]});
    write_api(dir.path(), "orders.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/orders/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("http://{addr}/orders/1"))
        .header("X-Api-Key", "s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 1);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalled_backend_body_is_cut_off() {
    let backend = spawn_backend("stall").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    let mut definition = api("stall", "/stall", &backend.url());
    definition["proxy"]["timeout"] = json!("200ms");
    write_api(dir.path(), "stall.json", &definition);

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    // Headers arrive in time; the body then stops
    let response = reqwest::get(format!("http://{addr}/stall/stall")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = tokio::time::timeout(std::time::Duration::from_secs(3), response.bytes())
        .await
        .expect("relayed body hung past the route timeout");
    assert!(body.is_err());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_caller_disconnect_cancels_backend_call() {
    let backend = spawn_backend("hold").await;
    let dir = tempdir().unwrap();
    let config = write_gateway_config(dir.path(), json!({}));
    write_api(dir.path(), "hold.json", &api("hold", "/hold", &backend.url()));

    let gateway = Gateway::new(config);
    let addr = gateway.start().await.unwrap();

    let impatient = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(200))
        .build()
        .unwrap();
    assert!(
        impatient
            .get(format!("http://{addr}/hold/hold"))
            .send()
            .await
            .is_err()
    );
    drop(impatient);
    assert_eq!(backend.hits(), 1);

    let cancelled = async {
        while !backend.abandoned() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(1), cancelled)
        .await
        .expect("backend call kept running after the caller left");

    gateway.stop().await;
}
