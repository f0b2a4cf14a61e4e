//! Integration tests for the rollup HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tsdb_rollup::server::{run, ServerConfig};
    use tsdb_rollup::{ChannelSink, Config, RolledUpSample, RollupPublisher};

    fn test_publisher() -> (Arc<RollupPublisher>, crossbeam_channel::Receiver<RolledUpSample>) {
        let (sink, receiver) = ChannelSink::bounded(64);
        let config = Config {
            flush_interval: Some(Duration::from_secs(3600)),
            data_path: std::env::temp_dir().join("tsdb-rollup-server-test"),
            ..Config::default()
        };
        let publisher = RollupPublisher::initialize(config, Arc::new(sink))
            .expect("Failed to initialize publisher");
        (Arc::new(publisher), receiver)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (publisher, _receiver) = test_publisher();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&publisher))
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_put_single_and_array() {
        let (publisher, receiver) = test_publisher();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&publisher))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();

        // Seconds timestamp, single object
        let single = serde_json::json!({
            "metric": "cpu.load",
            "timestamp": 1_700_000_000i64,
            "value": 2.0,
            "tags": { "host": "a" }
        });
        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&single)
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], 1);
        assert_eq!(body["failed"], 0);

        // Same key in milliseconds, plus a second host
        let batch = serde_json::json!([
            { "metric": "cpu.load", "timestamp": 1_700_000_000_500i64, "value": 4.0, "tags": { "host": "a" } },
            { "metric": "cpu.load", "timestamp": 1_700_000_000_500i64, "value": 9.0, "tags": { "host": "b" } }
        ]);
        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&batch)
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], 2);

        let stats: serde_json::Value = client
            .get(format!("http://{}/api/stats", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .unwrap();
        assert_eq!(stats["live_buckets"], 2);
        assert_eq!(stats["samples_published"], 3);

        let _ = shutdown_tx.send(());

        let report = publisher.shutdown();
        assert_eq!(report.emitted, 2);

        let mut rollups: Vec<RolledUpSample> = receiver.try_iter().collect();
        rollups.sort_by(|a, b| a.tags["host"].cmp(&b.tags["host"]));
        assert_eq!(rollups[0].sample_count, 2);
        assert!((rollups[0].average - 3.0).abs() < f64::EPSILON);
        assert_eq!(rollups[1].sample_count, 1);
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_points() {
        let (publisher, _receiver) = test_publisher();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&publisher))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let bad = serde_json::json!({
            "metric": "bad metric name",
            "timestamp": 1,
            "value": 1.0
        });
        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&bad)
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], 0);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["errors"][0]["index"], 0);

        // Partial success is still OK
        let mixed = serde_json::json!([
            { "metric": "ok.metric", "timestamp": 1, "value": 1.0 },
            { "metric": "bad metric", "timestamp": 1, "value": 1.0 }
        ]);
        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&mixed)
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["failed"], 1);
        assert_eq!(body["errors"][0]["index"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_put_accepts_string_values() {
        let (publisher, receiver) = test_publisher();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&publisher))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let points = serde_json::json!([
            { "metric": "disk.used", "timestamp": 1_700_000_000i64, "value": "42" },
            { "metric": "disk.used", "timestamp": 1_700_000_001i64, "value": 44 },
            { "metric": "disk.used", "timestamp": 1_700_000_002i64, "value": "n/a" }
        ]);
        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&points)
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], 2);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["errors"][0]["index"], 2);

        let _ = shutdown_tx.send(());

        publisher.shutdown();
        let rollup = receiver.try_recv().expect("one rollup");
        assert_eq!(rollup.sample_count, 2);
        assert!((rollup.average - 43.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_health_reports_stopping_after_shutdown() {
        let (publisher, _receiver) = test_publisher();
        let (addr, shutdown_tx) = run(ServerConfig::new(0), Arc::clone(&publisher))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        publisher.shutdown();

        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "stopping");

        let response = client
            .post(format!("http://{}/api/put", addr))
            .json(&serde_json::json!({ "metric": "m", "timestamp": 1, "value": 1.0 }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let _ = shutdown_tx.send(());
    }
}
