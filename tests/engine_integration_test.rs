//! 引擎 + 实例池集成测试（内置 mock_adapter）

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use argus::config::AppConfig;
    use argus::core::{Cognition, EngineError, PlannedAction, RuntimeBuilder};
    use argus::plugins::mock::ADAPTER_NAME;
    use argus::plugins::{AdapterConfig, AdapterError, ConfigMap, ElementId, UiSnapshot};
    use argus::{EngineState, TaskOutcome};
    use serde_json::json;

    /// 点击快照中名为 "OK" 的元素，并执行一次原生命令
    struct ClickOk;

    #[async_trait::async_trait]
    impl Cognition for ClickOk {
        async fn plan(&self, task: &str, snapshot: &UiSnapshot) -> Result<Vec<PlannedAction>, AdapterError> {
            let button = snapshot
                .elements
                .iter()
                .find(|e| e.name.as_deref() == Some("OK"))
                .ok_or_else(|| AdapterError::Operation("no OK button".into()))?;
            let mut params = ConfigMap::new();
            params.insert("task".into(), json!(task));
            Ok(vec![
                PlannedAction::Click {
                    element_id: button.id.clone(),
                    options: ConfigMap::new(),
                },
                PlannedAction::NativeCommand {
                    command_name: "log".into(),
                    params,
                },
            ])
        }
    }

    #[tokio::test]
    async fn test_full_pca_loop_with_mock_adapter() {
        let runtime = RuntimeBuilder::new(AppConfig::default())
            .with_cognition(Arc::new(ClickOk))
            .build();
        let engine = Arc::clone(&runtime.engine);

        // 未启动时任务被拒绝
        let outcome = engine.run_task("press ok", ADAPTER_NAME).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Rejected { state: EngineState::Idle });

        engine.start().unwrap();
        assert_eq!(engine.status(), EngineState::Running);

        let outcome = engine.run_task("press ok", ADAPTER_NAME).await.unwrap();
        let TaskOutcome::Completed { task_id, actions } = outcome else {
            panic!("expected completed outcome, got {outcome:?}");
        };
        assert!(!task_id.is_empty());
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.success));
        assert_eq!(actions[0].message, format!("Clicked {}", ElementId::new("mock-button")));
        assert_eq!(actions[1].data.get("task"), Some(&json!("press ok")));

        assert_eq!(engine.active_adapters(), vec![ADAPTER_NAME.to_string()]);
        assert!(runtime.pool.is_loaded(ADAPTER_NAME));

        engine.stop().await;
        assert_eq!(engine.status(), EngineState::Stopped);
        assert!(engine.active_adapters().is_empty());
        assert!(runtime.pool.list_loaded().is_empty());

        // STOPPED 后可以再次启动并重新加载
        engine.start().unwrap();
        assert!(engine.run_task("again", ADAPTER_NAME).await.unwrap().is_completed());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_app_moves_engine_to_error() {
        let runtime = RuntimeBuilder::new(AppConfig::default()).build();
        let engine = Arc::clone(&runtime.engine);
        engine.start().unwrap();

        let err = engine.run_task("anything", "no_such_app").await.unwrap_err();
        assert!(matches!(err, EngineError::Acquisition(_)));
        assert_eq!(engine.status(), EngineState::Error);

        // ERROR 不能直接启动，先停止
        assert!(engine.start().is_err());
        engine.stop().await;
        assert_eq!(engine.status(), EngineState::Stopped);
        engine.start().unwrap();
        assert_eq!(engine.status(), EngineState::Running);
    }

    #[tokio::test]
    async fn test_pool_is_shared_between_engine_and_direct_callers() {
        let runtime = RuntimeBuilder::new(AppConfig::default()).build();
        let direct = runtime
            .pool
            .get(ADAPTER_NAME, &AdapterConfig::default())
            .await
            .unwrap();
        assert!(direct.missing().is_none());

        runtime.engine.start().unwrap();
        assert!(runtime.engine.run_task("noop", ADAPTER_NAME).await.unwrap().is_completed());

        let again = runtime.pool.loaded(ADAPTER_NAME).unwrap();
        assert!(Arc::ptr_eq(&direct, &again));

        let report = runtime.pool.unload(ADAPTER_NAME).await;
        assert!(report.was_loaded);
        assert!(report.close_errors.is_empty());
        assert!(!runtime.pool.unload(ADAPTER_NAME).await.was_loaded);
        runtime.engine.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_instance() {
        let runtime = RuntimeBuilder::new(AppConfig::default()).build();
        let engine = Arc::clone(&runtime.engine);
        engine.start().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.run_task(&format!("task {i}"), ADAPTER_NAME).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_completed());
        }
        assert_eq!(runtime.pool.list_loaded(), vec![ADAPTER_NAME.to_string()]);
        engine.stop().await;
    }
}
