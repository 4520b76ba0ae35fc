//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约测试
//! - e2e 测试：ScriptedFetcher -> Dispatcher -> Aggregator -> SnapshotStream
//! - 配置文件 -> 完整一轮抓取

#[cfg(test)]
mod contract_tests {
    use contracts::{validate_key_set, ContractError};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_key_set_rules() {
        assert!(matches!(
            validate_key_set::<&str>(&[]),
            Err(ContractError::EmptyKeySet)
        ));
        assert!(matches!(
            validate_key_set(&["labs", "labs"]),
            Err(ContractError::DuplicateKey { .. })
        ));
        assert!(validate_key_set(&["labs", "vitals"]).is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use aggregator::{Aggregator, AggregatorConfig, AggregatorHandle};
    use contracts::{AggregationFault, ContractError, DispatchConfig, DispatchMode};
    use dispatcher::{Dispatcher, WorkerOutcome};
    use observability::RoundStatsAggregator;
    use rand::Rng;
    use serde_json::{json, Value};
    use sources::{ScriptedFetcher, ScriptedResponse};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    fn start(names: &[&str]) -> AggregatorHandle<String, Value> {
        Aggregator::start(keys(names), AggregatorConfig::default()).unwrap()
    }

    fn expected(entries: &[(&str, Vec<Value>)]) -> HashMap<String, Vec<Value>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// A→[a1], B→[], C→[c1,c2]，完成顺序随机
    fn abc_fetcher(max_delay_ms: u64) -> ScriptedFetcher {
        let mut rng = rand::rng();
        let mut delay = || Duration::from_millis(rng.random_range(0..=max_delay_ms));

        ScriptedFetcher::new()
            .with_response(
                "A",
                ScriptedResponse::records(vec![json!("a1")]).with_delay(delay()),
            )
            .with_response("B", ScriptedResponse::records(vec![]).with_delay(delay()))
            .with_response(
                "C",
                ScriptedResponse::records(vec![json!("c1"), json!("c2")]).with_delay(delay()),
            )
    }

    /// Batch 轮次结果与完成顺序无关
    #[tokio::test]
    async fn test_batch_round_independent_of_completion_order() {
        for _ in 0..5 {
            let handle = start(&["A", "B", "C"]);
            let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();

            let round = dispatcher
                .run_fetch_round(keys(&["A", "B", "C"]), Arc::new(abc_fetcher(20)), DispatchMode::Batch)
                .await
                .unwrap();
            assert!(round.is_finished());

            let snapshot = handle.current().await.unwrap();
            assert_eq!(
                snapshot.to_map(),
                expected(&[
                    ("A", vec![json!("a1")]),
                    ("B", vec![]),
                    ("C", vec![json!("c1"), json!("c2")]),
                ])
            );
            assert_eq!(snapshot.version(), 3);

            handle.stop().await;
        }
    }

    /// 单个 key 失败只影响它自己
    #[tokio::test]
    async fn test_failure_isolated_to_one_key() {
        let handle = start(&["A", "B", "C"]);
        let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();
        let fetcher = ScriptedFetcher::new()
            .with_response("A", ScriptedResponse::records(vec![json!("a1")]))
            .with_response("B", ScriptedResponse::failing())
            .with_response("C", ScriptedResponse::records(vec![json!("c1"), json!("c2")]));

        let report = dispatcher
            .run_fetch_round(keys(&["A", "B", "C"]), Arc::new(fetcher), DispatchMode::Streaming)
            .await
            .unwrap()
            .wait_all()
            .await;

        assert_eq!(report.outcome(&"B".to_string()), Some(WorkerOutcome::Failed));
        assert_eq!(report.fetched(), 2);
        assert_eq!(
            handle.current().await.unwrap().to_map(),
            expected(&[
                ("A", vec![json!("a1")]),
                ("B", vec![]),
                ("C", vec![json!("c1"), json!("c2")]),
            ])
        );

        handle.stop().await;
    }

    /// panic 与超时都降级为空列表
    #[tokio::test(start_paused = true)]
    async fn test_panic_and_timeout_degrade_to_empty() {
        let handle = start(&["labs", "notes", "imaging"]);
        let config = DispatchConfig {
            fetch_timeout_ms: Some(100),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(handle.sender(), config).unwrap();
        let fetcher = ScriptedFetcher::new()
            .with_response("labs", ScriptedResponse::records(vec![json!(7)]))
            .with_response("notes", ScriptedResponse::panicking())
            .with_response(
                "imaging",
                ScriptedResponse::records(vec![json!("ct")]).with_delay(Duration::from_secs(5)),
            );

        let report = dispatcher
            .run_fetch_round(
                keys(&["labs", "notes", "imaging"]),
                Arc::new(fetcher),
                DispatchMode::Batch,
            )
            .await
            .unwrap()
            .wait_all()
            .await;

        assert_eq!(report.outcome(&"notes".to_string()), Some(WorkerOutcome::Panicked));
        assert_eq!(report.outcome(&"imaging".to_string()), Some(WorkerOutcome::TimedOut));
        assert_eq!(report.degraded(), 2);

        let snapshot = handle.current().await.unwrap();
        assert_eq!(snapshot.get(&"labs".to_string()), Some(&[json!(7)][..]));
        assert_eq!(snapshot.get(&"notes".to_string()), Some(&[][..]));
        assert_eq!(snapshot.get(&"imaging".to_string()), Some(&[][..]));

        let mut stats = RoundStatsAggregator::new();
        stats.update(&report);
        let summary = stats.summary();
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.degraded, 2);

        handle.stop().await;
    }

    /// 取消不会让 wait_all 挂住，也不会产生更新
    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_hang() {
        let handle = start(&["labs", "vitals"]);
        let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();
        let slow = ScriptedResponse::records(vec![json!(1)]).with_delay(Duration::from_secs(3600));
        let fetcher = ScriptedFetcher::new()
            .with_response("labs", slow.clone())
            .with_response("vitals", slow);

        let round = dispatcher
            .run_fetch_round(keys(&["labs", "vitals"]), Arc::new(fetcher), DispatchMode::Streaming)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        round.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), round.wait_all())
            .await
            .expect("wait_all hung after cancel");

        assert_eq!(report.cancelled(), 2);
        assert_eq!(handle.current().await.unwrap().version(), 0);

        handle.stop().await;
    }

    /// 并发上限
    #[tokio::test]
    async fn test_concurrency_cap_respected() {
        let names = ["k0", "k1", "k2", "k3", "k4", "k5"];
        let handle = start(&names);
        let config = DispatchConfig {
            max_concurrency: Some(2),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(handle.sender(), config).unwrap();
        let fetcher = names.iter().fold(ScriptedFetcher::new(), |f, key| {
            f.with_response(
                *key,
                ScriptedResponse::records(vec![json!(key)]).with_delay(Duration::from_millis(5)),
            )
        });

        dispatcher
            .run_fetch_round(keys(&names), Arc::new(fetcher), DispatchMode::Batch)
            .await
            .unwrap();

        let metrics = dispatcher.metrics().snapshot();
        assert!(metrics.peak_in_flight <= 2, "peak = {}", metrics.peak_in_flight);
        assert_eq!(metrics.fetched_count, 6);
        assert_eq!(handle.current().await.unwrap().len(), 6);

        handle.stop().await;
    }

    /// 最终 key 集 = 收到过更新的 key；值为最后一次更新
    #[tokio::test]
    async fn test_final_state_is_last_accepted_update() {
        let handle: AggregatorHandle<&str, u32> =
            Aggregator::start(["labs", "vitals", "notes"], AggregatorConfig::default()).unwrap();

        handle.send_update("labs", vec![1, 2]).await.unwrap();
        handle.send_update("vitals", vec![3]).await.unwrap();
        handle.send_update("labs", vec![4, 5]).await.unwrap();

        let snapshot = handle.current().await.unwrap();
        let mut present: Vec<_> = snapshot.keys().copied().collect();
        present.sort();
        assert_eq!(present, vec!["labs", "vitals"]);
        assert_eq!(snapshot.get(&"labs"), Some(&[4, 5][..]));
        assert_eq!(snapshot.get(&"notes"), None);

        let metrics = handle.metrics().snapshot();
        assert_eq!(metrics.accepted_count, 3);
        assert_eq!(metrics.emitted_count, metrics.accepted_count);

        handle.stop().await;
    }

    /// 发射次数 = 接受次数；U1 先于 U2 被观察到
    #[tokio::test]
    async fn test_emissions_match_accepted_updates_in_order() {
        let handle: AggregatorHandle<&str, u32> =
            Aggregator::start(["labs", "vitals"], AggregatorConfig::default()).unwrap();
        let mut stream = handle.subscribe().await.unwrap();

        handle.send_update("labs", vec![1]).await.unwrap();
        handle.send_update("vitals", vec![2, 3]).await.unwrap();
        handle.send_update("labs", vec![9]).await.unwrap();
        handle.stop().await;

        let mut versions = Vec::new();
        let mut seen_vitals_without_labs = false;
        while let Some(snapshot) = stream.next().await {
            if snapshot.contains_key(&"vitals") && !snapshot.contains_key(&"labs") {
                seen_vitals_without_labs = true;
            }
            versions.push(snapshot.version());
        }

        // 首个为 replay 的初始空快照
        assert_eq!(versions, vec![0, 1, 2, 3]);
        assert!(!seen_vitals_without_labs);
        assert_eq!(stream.skipped(), 0);
    }

    /// 长度守卫：拒绝、不发射、保留旧值、报告故障
    #[tokio::test]
    async fn test_length_guard_rejects_without_emission() {
        let handle: AggregatorHandle<&str, u32> =
            Aggregator::start(["labs"], AggregatorConfig::default()).unwrap();
        let mut faults = handle.subscribe_faults().await.unwrap();

        handle.send_update("labs", vec![1, 2]).await.unwrap();
        let mut stream = handle.subscribe().await.unwrap();
        handle.send_update("labs", vec![3]).await.unwrap();
        handle.send_update("other", vec![4]).await.unwrap();

        let snapshot = handle.current().await.unwrap();
        assert_eq!(snapshot.get(&"labs"), Some(&[1, 2][..]));
        assert_eq!(snapshot.version(), 1);

        assert_eq!(
            faults.next().await,
            Some(AggregationFault::LengthMismatch {
                key: "labs",
                existing: 2,
                incoming: 1,
            })
        );
        assert_eq!(
            faults.next().await,
            Some(AggregationFault::UnknownKey { key: "other" })
        );

        handle.stop().await;

        // 订阅时的 replay 之后没有任何发射
        assert_eq!(stream.next().await.map(|s| s.version()), Some(1));
        assert!(stream.next().await.is_none());
    }

    /// 迟到的订阅者首先看到最终状态
    #[tokio::test]
    async fn test_late_subscriber_sees_final_state_first() {
        let handle = start(&["A", "B", "C"]);
        let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();

        dispatcher
            .run_fetch_round(keys(&["A", "B", "C"]), Arc::new(abc_fetcher(5)), DispatchMode::Batch)
            .await
            .unwrap();

        let mut late = handle.subscribe().await.unwrap();
        let first = late.next().await.unwrap();
        assert_eq!(first.version(), 3);
        assert_eq!(first.total_records(), 3);

        handle.stop().await;
        assert!(late.next().await.is_none());
    }

    /// 慢订阅者会跳过旧快照，但最终收敛到最终状态
    #[tokio::test]
    async fn test_slow_subscriber_converges() {
        let config = AggregatorConfig {
            subscriber_buffer: 2,
            ..Default::default()
        };
        let handle: AggregatorHandle<&str, u32> = Aggregator::start(["counter"], config).unwrap();
        let stream = handle.subscribe().await.unwrap();

        for i in 0..10 {
            handle.send_update("counter", vec![i]).await.unwrap();
        }
        handle.stop().await;

        let mut stream = stream;
        let mut last = None;
        while let Some(snapshot) = stream.next().await {
            last = Some(snapshot);
        }

        let last = last.unwrap();
        assert_eq!(last.version(), 10);
        assert_eq!(last.get(&"counter"), Some(&[9][..]));
        assert!(stream.skipped() > 0);
    }

    /// stop 后流结束、发送失败、不能再启动轮次
    #[tokio::test]
    async fn test_stop_completes_streams_and_rejects_sends() {
        let handle = start(&["labs"]);
        let sender = handle.sender();
        let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();
        let stream = handle.subscribe().await.unwrap();

        sender.send_update("labs".to_string(), vec![json!(1)]).await.unwrap();
        handle.stop().await;

        assert_eq!(stream.last().await.map(|s| s.version()), Some(1));
        assert!(matches!(
            sender.send_update("labs".to_string(), vec![json!(2)]).await,
            Err(ContractError::AggregatorStopped)
        ));

        let fetcher = ScriptedFetcher::new().with_response("labs", ScriptedResponse::default());
        assert!(dispatcher
            .run_fetch_round(keys(&["labs"]), Arc::new(fetcher), DispatchMode::Batch)
            .await
            .is_err());
    }

    /// 多轮复用同一个 aggregator (下拉刷新)
    #[tokio::test]
    async fn test_repeated_rounds_refresh_snapshot() {
        let handle = start(&["A", "B", "C"]);
        let dispatcher = Dispatcher::new(handle.sender(), DispatchConfig::default()).unwrap();
        let fetcher = Arc::new(abc_fetcher(3));

        for _ in 0..3 {
            dispatcher
                .run_fetch_round(keys(&["A", "B", "C"]), Arc::clone(&fetcher), DispatchMode::Batch)
                .await
                .unwrap();
        }

        let snapshot = handle.current().await.unwrap();
        assert_eq!(snapshot.version(), 9);
        assert_eq!(snapshot.total_records(), 3);
        assert_eq!(handle.metrics().snapshot().rejected_count, 0);
        assert_eq!(dispatcher.metrics().snapshot().rounds, 3);

        handle.stop().await;
    }
}

#[cfg(test)]
mod config_tests {
    use std::io::Write;
    use std::sync::Arc;

    use aggregator::{Aggregator, AggregatorHandle};
    use config_loader::ConfigLoader;
    use dispatcher::{Dispatcher, WorkerOutcome};
    use serde_json::{json, Value};
    use sources::ScriptedFetcher;

    const SESSION_TOML: &str = r#"
rounds = 2

[aggregator]
inbox_capacity = 8
subscriber_buffer = 32

[dispatch]
mode = "batch"
max_concurrency = 2

[[resources]]
key = "allergies"
records = [{ code = "A1" }, { code = "A2" }]

[[resources]]
key = "vitals"
delay_ms = 5
fail = true

[[resources]]
key = "labs"
records = [42]
delay_ms = 2
"#;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// 配置文件 -> aggregator + dispatcher + scripted fetcher -> 最终快照
    #[tokio::test]
    async fn test_session_from_config_file() {
        let file = write_config(".toml", SESSION_TOML);
        let blueprint = ConfigLoader::load_from_path(file.path()).unwrap();

        let handle: AggregatorHandle<String, Value> =
            Aggregator::start(blueprint.keys(), blueprint.aggregator.clone()).unwrap();
        let dispatcher = Dispatcher::new(handle.sender(), blueprint.dispatch.clone()).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::from_blueprint(&blueprint));

        let mut last_report = None;
        for _ in 0..blueprint.rounds {
            let round = dispatcher
                .run_round(blueprint.keys(), Arc::clone(&fetcher))
                .await
                .unwrap();
            last_report = Some(round.wait_all().await);
        }

        let report = last_report.unwrap();
        assert_eq!(report.outcome(&"vitals".to_string()), Some(WorkerOutcome::Failed));
        assert_eq!(report.total_records(), 3);

        let snapshot = handle.current().await.unwrap();
        assert_eq!(snapshot.version(), 6);
        assert_eq!(
            snapshot.get(&"allergies".to_string()),
            Some(&[json!({"code": "A1"}), json!({"code": "A2"})][..])
        );
        assert_eq!(snapshot.get(&"vitals".to_string()), Some(&[][..]));
        assert_eq!(snapshot.get(&"labs".to_string()), Some(&[json!(42)][..]));
        assert!(dispatcher.metrics().snapshot().peak_in_flight <= 2);

        handle.stop().await;
    }

    /// TOML 与 JSON 互转后仍得到同一份配置
    #[test]
    fn test_toml_json_equivalence() {
        let file = write_config(".toml", SESSION_TOML);
        let from_toml = ConfigLoader::load_from_path(file.path()).unwrap();

        let json = ConfigLoader::to_json(&from_toml).unwrap();
        let json_file = write_config(".json", &json);
        let from_json = ConfigLoader::load_from_path(json_file.path()).unwrap();

        assert_eq!(from_json.keys(), from_toml.keys());
        assert_eq!(from_json.dispatch, from_toml.dispatch);
        assert_eq!(from_json.aggregator, from_toml.aggregator);
        assert_eq!(from_json.rounds, 2);
    }

    #[test]
    fn test_invalid_config_file_rejected() {
        let file = write_config(
            ".toml",
            r#"
[aggregator]
inbox_capacity = 0

[[resources]]
key = "labs"
"#,
        );

        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("inbox_capacity"), "got: {err}");
    }
}
