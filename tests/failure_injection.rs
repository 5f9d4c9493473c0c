//! Failure injection tests for the pipeline service.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use clipscribe::config::PipelineConfig;
use clipscribe::http::HttpServer;
use clipscribe::lifecycle::Shutdown;

mod common;

fn point_provider(config: &mut PipelineConfig, name: &str, addr: SocketAddr) {
    let provider = config
        .providers
        .iter_mut()
        .find(|p| p.name == name)
        .unwrap();
    provider.base_url = format!("http://{addr}");
    provider.api_key = "test-key".to_string();
}

async fn spawn_server(config: PipelineConfig, addr: SocketAddr) -> Shutdown {
    let shutdown = Shutdown::new();
    let (_tx, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(config);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

fn tikhub_payload() -> String {
    json!({
        "code": 200,
        "data": {
            "aweme_detail": {
                "desc": "测试视频",
                "video": {
                    "duration": 30000,
                    "play_addr": {
                        "url_list": ["https://cdn.example.com/v.mp4"]
                    }
                }
            }
        }
    })
    .to_string()
}

#[tokio::test]
async fn circuit_opens_and_skips_the_provider() {
    let tikhub_addr: SocketAddr = "127.0.0.1:28101".parse().unwrap();
    let minimax_addr: SocketAddr = "127.0.0.1:28102".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:28110".parse().unwrap();

    common::start_programmable_provider(tikhub_addr, move |_request| {
        let body = tikhub_payload();
        async move { (200, body) }
    })
    .await;

    let minimax_calls = Arc::new(AtomicU32::new(0));
    let mc = minimax_calls.clone();
    common::start_programmable_provider(minimax_addr, move |_request| {
        mc.fetch_add(1, Ordering::SeqCst);
        async move { (500, json!({"error": "boom"}).to_string()) }
    })
    .await;

    let mut config = PipelineConfig::default();
    config.server.bind_address = server_addr.to_string();
    config.chains.transcribe = vec!["minimax".to_string()];
    config.chains.script = vec!["mock".to_string()];
    // two terminal failures trip the breaker, and it stays open
    config.resilience.max_retries = 0;
    config.resilience.min_request_volume = 2;
    config.resilience.error_rate_threshold = 0.5;
    config.resilience.max_failures = 2;
    config.resilience.reset_timeout_ms = 60_000;
    config.observability.metrics_enabled = false;
    point_provider(&mut config, "tikhub-web", tikhub_addr);
    point_provider(&mut config, "tikhub-app", tikhub_addr);
    point_provider(&mut config, "minimax", minimax_addr);

    let shutdown = spawn_server(config, server_addr).await;
    let client = http_client();

    for _ in 0..3 {
        let res = client
            .post(format!("http://{server_addr}/api/video/transcribe"))
            .json(&json!({"videoUrl": "https://v.douyin.com/iAbCdEf/"}))
            .send()
            .await
            .expect("Pipeline unreachable");
        assert_eq!(res.status(), 422);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "TRANSCRIPTION_FAILED");
    }

    // The third request must have been skipped, not sent
    assert_eq!(minimax_calls.load(Ordering::SeqCst), 2);

    let res = client
        .get(format!("http://{server_addr}/api/status"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let minimax = body["dependencies"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["name"] == "minimax")
        .expect("minimax dependency missing from status");
    assert_eq!(minimax["circuit_state"], "OPEN");
    assert!(minimax["opened_ms_ago"].is_u64());
    shutdown.trigger();
}

#[tokio::test]
async fn mock_adapters_are_the_last_resort() {
    let tikhub_addr: SocketAddr = "127.0.0.1:28121".parse().unwrap();
    let yunmao_addr: SocketAddr = "127.0.0.1:28122".parse().unwrap();
    let minimax_addr: SocketAddr = "127.0.0.1:28123".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:28130".parse().unwrap();

    common::start_programmable_provider(tikhub_addr, move |_request| {
        let body = tikhub_payload();
        async move { (200, body) }
    })
    .await;
    common::start_programmable_provider(yunmao_addr, move |_request| async move {
        (500, json!({"error": "down"}).to_string())
    })
    .await;
    common::start_programmable_provider(minimax_addr, move |_request| async move {
        (500, json!({"error": "down"}).to_string())
    })
    .await;

    let mut config = PipelineConfig::default();
    config.server.bind_address = server_addr.to_string();
    config.chains.script = vec!["mock".to_string()];
    config.resilience.max_retries = 0;
    config.observability.metrics_enabled = false;
    point_provider(&mut config, "tikhub-web", tikhub_addr);
    point_provider(&mut config, "tikhub-app", tikhub_addr);
    point_provider(&mut config, "yunmao", yunmao_addr);
    point_provider(&mut config, "minimax", minimax_addr);

    let shutdown = spawn_server(config, server_addr).await;

    let res = http_client()
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .json(&json!({"videoUrl": "https://v.douyin.com/iAbCdEf/"}))
        .send()
        .await
        .expect("Pipeline unreachable");

    assert_eq!(res.status(), 200, "mock adapter should keep the pipeline alive");
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"]["provider"]["videoResolver"], "tikhub-web");
    assert_eq!(body["data"]["provider"]["transcription"], "mock");
    assert_eq!(body["data"]["provider"]["scriptGenerator"], "mock");
    assert!(!body["data"]["originalText"].as_str().unwrap().is_empty());
    assert!(!body["data"]["script"]["scenes"].as_array().unwrap().is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn admission_rejects_when_saturated() {
    let tikhub_addr: SocketAddr = "127.0.0.1:28141".parse().unwrap();
    let server_addr: SocketAddr = "127.0.0.1:28150".parse().unwrap();

    // Slow resolve keeps the only slot busy for a second
    common::start_programmable_provider(tikhub_addr, move |_request| {
        let body = tikhub_payload();
        async move {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            (200, body)
        }
    })
    .await;

    let mut config = PipelineConfig::default();
    config.server.bind_address = server_addr.to_string();
    config.chains.transcribe = vec!["mock".to_string()];
    config.chains.script = vec!["mock".to_string()];
    config.concurrency.max_concurrency = 1;
    config.concurrency.max_queue_length = 0;
    config.concurrency.queue_wait_timeout_ms = 100;
    config.resilience.request_timeout_ms = 3000;
    config.observability.metrics_enabled = false;
    point_provider(&mut config, "tikhub-web", tikhub_addr);
    point_provider(&mut config, "tikhub-app", tikhub_addr);

    let shutdown = spawn_server(config, server_addr).await;
    let client = http_client();

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .post(format!("http://{server_addr}/api/video/transcribe"))
                .json(&json!({"videoUrl": "https://v.douyin.com/iAbCdEf/"}))
                .send()
                .await
                .expect("Pipeline unreachable")
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = Instant::now();
    let second = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .json(&json!({"videoUrl": "https://v.douyin.com/iAbCdEf/"}))
        .send()
        .await
        .expect("Pipeline unreachable");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "full queue must reject immediately"
    );
    assert_eq!(second.status(), 503);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"]["code"], "SYSTEM_BUSY");
    assert_eq!(body["error"]["retryable"], true);

    let first = first.await.unwrap();
    assert_eq!(first.status(), 200, "admitted request should still finish");
    shutdown.trigger();
}

#[tokio::test]
async fn auth_enforced_when_required() {
    let server_addr: SocketAddr = "127.0.0.1:28160".parse().unwrap();

    let mut config = PipelineConfig::default();
    config.server.bind_address = server_addr.to_string();
    config.chains.resolve = vec!["direct".to_string()];
    config.chains.transcribe = vec!["mock".to_string()];
    config.chains.script = vec!["mock".to_string()];
    config.security.require_auth = true;
    config.security.min_token_length = 32;
    config.observability.metrics_enabled = false;

    let shutdown = spawn_server(config, server_addr).await;
    let client = http_client();
    let request_body = json!({"videoUrl": "https://cdn.example.com/video.mp4"});

    let res = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .json(&request_body)
        .send()
        .await
        .expect("Pipeline unreachable");
    assert_eq!(res.status(), 401);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["retryable"], false);

    let res = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .header("Authorization", "Bearer short")
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .header("Authorization", format!("Bearer {}", "a".repeat(40)))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"]["provider"]["videoResolver"], "direct");
    shutdown.trigger();
}

#[tokio::test]
async fn oversized_request_bodies_are_rejected() {
    let server_addr: SocketAddr = "127.0.0.1:28170".parse().unwrap();

    let mut config = PipelineConfig::default();
    config.server.bind_address = server_addr.to_string();
    config.server.max_body_bytes = 1024;
    config.chains.resolve = vec!["direct".to_string()];
    config.chains.transcribe = vec!["mock".to_string()];
    config.chains.script = vec!["mock".to_string()];
    config.observability.metrics_enabled = false;

    let shutdown = spawn_server(config, server_addr).await;
    let client = http_client();

    let res = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .json(&json!({"mixedText": "词".repeat(2000)}))
        .send()
        .await
        .expect("Pipeline unreachable");
    assert_eq!(res.status(), 413);

    // A normal-sized request still goes through the same stack.
    let res = client
        .post(format!("http://{server_addr}/api/video/transcribe"))
        .json(&json!({"videoUrl": "https://cdn.example.com/video.mp4"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    shutdown.trigger();
}
