//! Load testing for the caching proxy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use caching_proxy::config::ProxyConfig;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_complete() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let client = proxy.client(None);

    let total_requests = 1000;
    // Keeps the number of open sockets under common fd limits.
    let in_flight = Arc::new(tokio::sync::Semaphore::new(128));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(total_requests);

    for i in 0..total_requests {
        let client = client.clone();
        let in_flight = in_flight.clone();
        let url = origin.url(&format!("/load/{}", i));
        handles.push(tokio::spawn(async move {
            let _permit = in_flight.acquire_owned().await.unwrap();
            let res = client.get(url).send().await?;
            let status = res.status();
            res.bytes().await?;
            Ok::<_, reqwest::Error>(status)
        }));
    }

    let mut ok = 0;
    for handle in handles {
        if let Ok(Ok(status)) = handle.await {
            if status.is_success() {
                ok += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!("{} requests in {:?}", total_requests, elapsed);
    assert_eq!(ok, total_requests);
    assert_eq!(origin.hits(), total_requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aborted_requests_drain_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let origin = common::start_origin().await;
    let mut config = ProxyConfig::default();
    config.cache.enabled = true;
    config.cache.path = dir.path().to_path_buf();
    config.cache.sweep_enabled = false;
    let proxy = common::start_proxy(config).await;

    {
        let client = proxy.client(None);
        let mut handles = Vec::new();
        for i in 0..100 {
            let client = client.clone();
            let path = if i % 2 == 0 { format!("/slow?{}", i) } else { format!("/fast/{}", i) };
            let url = origin.url(&path);
            handles.push(tokio::spawn(async move {
                let res = client.get(url).send().await?;
                res.bytes().await
            }));
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        for (i, handle) in handles.into_iter().enumerate() {
            if i % 2 == 0 {
                handle.abort();
            } else {
                assert!(handle.await.unwrap().is_ok());
            }
        }
    }

    tokio::time::timeout(Duration::from_secs(10), proxy.connections.wait_for_idle())
        .await
        .expect("connections should drain after clients go away");
    assert_eq!(proxy.connections.active_count(), 0);

    // Aborted fetches must not leave committed entries or temp files behind.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|n| !n.ends_with(".tmp")), "leftover temp files: {names:?}");
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = proxy.client(None).get(origin.url("/")).send().await.unwrap();
    assert!(res.status().is_success());
    drop(res);

    proxy.shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fresh = proxy.client(None);
    assert!(fresh.get(origin.url("/")).send().await.is_err());
}
