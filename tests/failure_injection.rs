//! Failure injection tests for the caching proxy.

use std::time::Duration;

use caching_proxy::config::ProxyConfig;
use reqwest::StatusCode;

mod common;

fn caching_config(dir: &tempfile::TempDir) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.cache.enabled = true;
    config.cache.path = dir.path().to_path_buf();
    config.cache.sweep_enabled = false;
    config
}

fn files_in(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn truncated_upstream_body_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let origin = common::start_raw_origin(
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nonly ten b",
    )
    .await;
    let proxy = common::start_proxy(caching_config(&dir)).await;

    let res = proxy
        .client(None)
        .get(format!("http://{}/truncated", origin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(files_in(&dir).is_empty(), "unexpected artifacts: {:?}", files_in(&dir));
}

#[tokio::test]
async fn garbage_from_upstream_is_bad_gateway() {
    let origin = common::start_raw_origin(b"this is not http\r\n\r\n").await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = proxy
        .client(None)
        .get(format!("http://{}/", origin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn corrupt_header_artifact_falls_back_to_origin() {
    let dir = tempfile::tempdir().unwrap();
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(caching_config(&dir)).await;
    let client = proxy.client(None);

    let res = client.get(origin.url("/fragile")).send().await.unwrap();
    let _ = res.text().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let header_file = files_in(&dir)
        .into_iter()
        .find(|n| n.ends_with("_headers.json"))
        .expect("entry should be committed");
    std::fs::write(dir.path().join(&header_file), b"{ not json").unwrap();

    let res = client.get(origin.url("/fragile")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "GET /fragile ");
    assert_eq!(origin.hits(), 2);

    // The refetch replaced the broken entry.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let res = client.get(origin.url("/fragile")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(origin.hits(), 2);
}

#[tokio::test]
async fn oversized_post_body_is_forwarded_uncached() {
    let dir = tempfile::tempdir().unwrap();
    let origin = common::start_origin().await;
    let mut config = caching_config(&dir);
    config.cache.max_key_body_bytes = 16;
    let proxy = common::start_proxy(config).await;
    let client = proxy.client(None);

    let body = "x".repeat(64);
    for _ in 0..2 {
        let res = client.post(origin.url("/big")).body(body.clone()).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), format!("POST /big {}", body));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(origin.hits(), 2);
    assert!(files_in(&dir).is_empty());
}
