//! Centralized integration tests for config-impl crate
use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigSource, SourceWatcher};
use config_impl::{ConfigAggregator, ConfigOptions, EnvironmentSource, FileSource, MemorySource};
use infrastructure_common::ConfigError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 在被停止之前永远挂起的变更流
struct IdleStream {
    stopped: CancellationToken,
}

#[async_trait]
impl SourceWatcher for IdleStream {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        self.stopped.cancelled().await;
        Err(ConfigError::source_unavailable("unreachable", "变更流已停止"))
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.stopped.cancel();
        Ok(())
    }
}

/// 读取失败、变更流永不投递的配置源
struct UnreachableSource;

#[async_trait]
impl ConfigSource for UnreachableSource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        Err(ConfigError::source_unavailable("unreachable", "连接被拒绝"))
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        Ok(Box::new(IdleStream {
            stopped: CancellationToken::new(),
        }))
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

fn aggregator(sources: Vec<Arc<dyn ConfigSource>>) -> ConfigAggregator {
    let mut options = ConfigOptions::new().with_retry_interval(Duration::from_millis(10));
    for source in sources {
        options = options.with_source(source);
    }
    ConfigAggregator::new(options)
}

async fn wait_for_subscriber(source: &MemorySource) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while source.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("监听任务未能及时订阅配置源");
}

#[tokio::test]
async fn test_priority_override() -> anyhow::Result<()> {
    let defaults = Arc::new(MemorySource::from_json(
        "defaults",
        &json!({"server": {"host": "0.0.0.0", "port": 80}, "log": "info"}),
    ));
    let overrides = Arc::new(MemorySource::from_json(
        "overrides",
        &json!({"server": {"port": 8080}}),
    ));
    let aggregator = aggregator(vec![
        defaults as Arc<dyn ConfigSource>,
        overrides as Arc<dyn ConfigSource>,
    ]);

    #[derive(Debug, Deserialize, PartialEq)]
    struct Server {
        host: String,
        port: u16,
    }

    let server: Server = aggregator.get(&["server"]).await.scan()?;
    assert_eq!(
        server,
        Server {
            host: "0.0.0.0".to_string(),
            port: 8080
        }
    );
    assert_eq!(aggregator.get(&["log"]).await.as_string(""), "info");
    Ok(())
}

#[tokio::test]
async fn test_cold_read_does_not_block_on_streams() {
    let memory = Arc::new(MemorySource::from_json("memory", &json!({"a": 1})));
    let aggregator = aggregator(vec![
        Arc::new(UnreachableSource) as Arc<dyn ConfigSource>,
        memory as Arc<dyn ConfigSource>,
        Arc::new(UnreachableSource) as Arc<dyn ConfigSource>,
    ]);

    let value = tokio::time::timeout(Duration::from_secs(1), aggregator.get(&["a"]))
        .await
        .expect("读取不应等待变更流");
    assert_eq!(value.as_i64(0), 1);
    aggregator.close().unwrap();
}

#[tokio::test]
async fn test_watcher_sees_only_distinct_values() {
    let source = Arc::new(MemorySource::from_json("memory", &json!({"feature": false, "n": 0})));
    let aggregator = aggregator(vec![source.clone() as Arc<dyn ConfigSource>]);
    let watcher = aggregator.watch(&["feature"]).await.unwrap();
    wait_for_subscriber(&source).await;

    source.update_json(&json!({"feature": false, "n": 1}));
    tokio::time::timeout(Duration::from_secs(2), async {
        while aggregator.get(&["n"]).await.as_i64(0) != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(100), watcher.next())
        .await
        .is_err());

    source.update_json(&json!({"feature": true, "n": 1}));
    let value = tokio::time::timeout(Duration::from_secs(2), watcher.next())
        .await
        .unwrap()
        .unwrap();
    assert!(value.as_bool(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_merge_is_atomic_for_readers() {
    let source = Arc::new(MemorySource::from_json("memory", &json!({"a": 0, "b": 0})));
    let aggregator = Arc::new(aggregator(vec![source.clone() as Arc<dyn ConfigSource>]));
    assert_eq!(aggregator.get(&["a"]).await.as_i64(-1), 0);
    wait_for_subscriber(&source).await;

    let writer = {
        let source = source.clone();
        tokio::spawn(async move {
            for n in 1..=200 {
                source.update_json(&json!({"a": n, "b": n}));
                tokio::task::yield_now().await;
            }
        })
    };

    let readers = (0..4).map(|_| {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            for _ in 0..200 {
                let document: Value = serde_json::from_slice(&aggregator.bytes().await).unwrap();
                assert_eq!(document["a"], document["b"], "读到了不完整的合并结果");
                tokio::task::yield_now().await;
            }
        })
    });

    for result in futures::future::join_all(readers).await {
        result.unwrap();
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn test_stop_is_terminal_across_tasks() {
    let source = Arc::new(MemorySource::from_json("memory", &json!({"a": 1})));
    let aggregator = aggregator(vec![source.clone() as Arc<dyn ConfigSource>]);
    let watcher = Arc::new(aggregator.watch(&["a"]).await.unwrap());

    let blocked = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.next().await })
    };
    let stopper = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.stop().await })
    };

    stopper.await.unwrap().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ConfigError::WatcherStopped)));

    // 停止后的更新不会再被投递
    wait_for_subscriber(&source).await;
    source.update_json(&json!({"a": 2}));
    for _ in 0..3 {
        assert!(matches!(watcher.next().await, Err(ConfigError::WatcherStopped)));
    }
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_dynamic_load() {
    let base = Arc::new(MemorySource::from_json("base", &json!({"a": 1})));
    let aggregator = aggregator(vec![base as Arc<dyn ConfigSource>]);
    assert!(!aggregator.get(&["d"]).await.exists());

    let extra = Arc::new(MemorySource::from_json("extra", &json!({"d": 5})));
    aggregator
        .load(vec![extra as Arc<dyn ConfigSource>])
        .await
        .unwrap();

    assert_eq!(aggregator.get(&["d"]).await.as_i64(0), 5);
    assert_eq!(aggregator.get(&["a"]).await.as_i64(0), 1);
}

#[tokio::test]
async fn test_file_and_environment_sources_together() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("service.yaml");
    std::fs::write(&path, "server:\n  port: 80\n  timeout: 5s\nname: from-file\n")?;
    std::env::set_var("LORN_AGG_IT_SERVER_PORT", "9090");

    let aggregator = aggregator(vec![
        Arc::new(FileSource::new(&path)?) as Arc<dyn ConfigSource>,
        Arc::new(EnvironmentSource::new("LORN_AGG_IT")) as Arc<dyn ConfigSource>,
    ]);

    assert_eq!(aggregator.get(&["server", "port"]).await.as_i64(0), 9090);
    assert_eq!(
        aggregator.get(&["server", "timeout"]).await.as_duration(Duration::ZERO),
        Duration::from_secs(5)
    );
    assert_eq!(aggregator.get(&["name"]).await.as_string(""), "from-file");
    aggregator.close()?;
    Ok(())
}
