//! 核心引擎：生命周期状态机 + 任务编排（Perception → Cognition → Action）
//!
//! 状态保存在 `watch` 通道里，所有转换都是 `send_if_modified` 上的比较后写入，
//! 因此 stop() 与正在执行的任务并发时，任务失败不会把 STOPPING / STOPPED 覆盖成 ERROR。
//! 每个阶段开始前都会重新检查状态是否仍为 RUNNING；已开始的 Action 阶段会执行完整个计划。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use super::cognition::{Cognition, NoopCognition};
use super::error::EngineError;
use super::state::{EngineState, TaskPhase};
use crate::plugins::adapter::contain;
use crate::plugins::{
    ActionResult, AdapterConfig, AdapterError, AdapterInstancePair, AdapterInstancePool, CapabilityKind, ConfigMap,
    PoolError,
};

/// 一次 run_task 的结果（失败以 EngineError 返回）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// 三个阶段全部完成
    Completed { task_id: String, actions: Vec<ActionResult> },
    /// 引擎未处于 RUNNING，任务未执行
    Rejected { state: EngineState },
    /// 目标应用缺少某种能力，无法执行任务
    Unusable { missing: CapabilityKind },
    /// 执行过程中状态离开 RUNNING，后续阶段未执行
    Cancelled { phase: TaskPhase, state: EngineState },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

pub struct CoreEngine {
    state: watch::Sender<EngineState>,
    pool: Arc<AdapterInstancePool>,
    /// 本引擎正在使用的适配器（只是视图，不拥有实例）
    active: Mutex<HashMap<String, Weak<AdapterInstancePair>>>,
    adapter_configs: HashMap<String, AdapterConfig>,
    cognition: Arc<dyn Cognition>,
}

impl CoreEngine {
    pub fn new(pool: Arc<AdapterInstancePool>) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        tracing::info!("CoreEngine initialized");
        Self {
            state,
            pool,
            active: Mutex::new(HashMap::new()),
            adapter_configs: HashMap::new(),
            cognition: Arc::new(NoopCognition),
        }
    }

    /// 每个应用加载适配器时使用的配置
    pub fn with_adapter_configs(mut self, configs: HashMap<String, AdapterConfig>) -> Self {
        self.adapter_configs = configs;
        self
    }

    pub fn with_cognition(mut self, cognition: Arc<dyn Cognition>) -> Self {
        self.cognition = cognition;
        self
    }

    pub fn pool(&self) -> &Arc<AdapterInstancePool> {
        &self.pool
    }

    pub fn status(&self) -> EngineState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// 当前仍存活的活跃适配器名（排序）
    pub fn active_adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_active()
            .iter()
            .filter(|(_, pair)| pair.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// 启动引擎：只接受 IDLE / STOPPED
    pub fn start(&self) -> Result<(), EngineError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if state.can_start() {
                *state = EngineState::Starting;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            tracing::warn!(%state, "Engine cannot be started from current state");
            return Err(EngineError::InvalidState {
                operation: "start",
                state,
            });
        }

        tracing::info!("Starting engine...");
        if self.transition(EngineState::Starting, EngineState::Running) {
            tracing::info!("Engine started successfully, state: RUNNING");
        } else {
            tracing::warn!(state = %self.status(), "Engine state changed during startup");
        }
        Ok(())
    }

    /// 停止引擎；STOPPING / STOPPED 时为空操作，IDLE 直接进入 STOPPED
    pub async fn stop(&self) {
        let mut previous = None;
        self.state.send_if_modified(|state| match *state {
            EngineState::Idle => {
                previous = Some(EngineState::Idle);
                *state = EngineState::Stopped;
                true
            }
            current if current.needs_shutdown() => {
                previous = Some(current);
                *state = EngineState::Stopping;
                true
            }
            _ => false,
        });

        match previous {
            None => {
                tracing::info!(state = %self.status(), "Engine is already stopped or stopping");
            }
            Some(EngineState::Idle) => {
                tracing::info!("Engine was idle, state: STOPPED");
            }
            Some(previous) => {
                tracing::info!(%previous, "Stopping engine...");
                self.shutdown_adapters().await;
                self.state.send_replace(EngineState::Stopped);
                tracing::info!("Engine stopped successfully, state: STOPPED");
            }
        }
    }

    async fn shutdown_adapters(&self) {
        let released = {
            let mut active = self.lock_active();
            let count = active.len();
            active.clear();
            count
        };
        tracing::debug!(released, "Cleared active adapter table");

        let reports = self.pool.unload_all().await;
        let failures: usize = reports.iter().map(|r| r.close_errors.len()).sum();
        if failures > 0 {
            tracing::warn!(failures, "Some adapters failed to close cleanly during shutdown");
        }
    }

    /// 执行一个任务：获取目标应用的适配器后运行一次 PCA 循环
    pub async fn run_task(&self, description: &str, target_app: &str) -> Result<TaskOutcome, EngineError> {
        let task_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("task", task_id = %task_id, app = target_app);
        self.execute(task_id, description, target_app).instrument(span).await
    }

    async fn execute(&self, task_id: String, description: &str, target_app: &str) -> Result<TaskOutcome, EngineError> {
        let state = self.status();
        if state != EngineState::Running {
            tracing::warn!(%state, "Engine is not running, task rejected");
            return Ok(TaskOutcome::Rejected { state });
        }
        tracing::info!(description, "Received task");

        let pair = match self.acquire(target_app).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                return Ok(TaskOutcome::Cancelled {
                    phase: TaskPhase::Perception,
                    state: self.status(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire adapters for task");
                self.fail();
                return Err(EngineError::Acquisition(e));
            }
        };
        let (Some(perception), Some(action)) = (pair.perception.clone(), pair.action.clone()) else {
            let missing = pair.missing().unwrap_or(CapabilityKind::Perception);
            tracing::error!(%missing, "Target adapter is missing a capability, cannot run task");
            return Ok(TaskOutcome::Unusable { missing });
        };

        if let Some(cancelled) = self.checkpoint(TaskPhase::Perception) {
            return Ok(cancelled);
        }
        tracing::info!("Perception phase");
        let snapshot = contain(perception.get_ui_snapshot(&ConfigMap::new()))
            .await
            .map_err(|e| self.task_failed(&task_id, TaskPhase::Perception, e))?;
        tracing::debug!(window = %snapshot.window_title, elements = snapshot.elements.len(), "Captured UI snapshot");

        if let Some(cancelled) = self.checkpoint(TaskPhase::Cognition) {
            return Ok(cancelled);
        }
        tracing::info!("Cognition phase");
        let plan = contain(self.cognition.plan(description, &snapshot))
            .await
            .map_err(|e| self.task_failed(&task_id, TaskPhase::Cognition, e))?;
        tracing::debug!(planned = plan.len(), "Cognition produced plan");

        if let Some(cancelled) = self.checkpoint(TaskPhase::Action) {
            return Ok(cancelled);
        }
        tracing::info!("Action phase");
        let mut actions = Vec::with_capacity(plan.len());
        for step in &plan {
            tracing::debug!(action = step.name(), "Dispatching planned action");
            let result = contain(step.dispatch(action.as_ref()))
                .await
                .map_err(|e| self.task_failed(&task_id, TaskPhase::Action, e))?;
            actions.push(result);
        }

        tracing::info!(actions = actions.len(), "Task completed");
        Ok(TaskOutcome::Completed { task_id, actions })
    }

    /// 优先复用活跃表中的实例，否则从 Pool 获取并记录
    ///
    /// 加载期间引擎离开 RUNNING 时新实例不进入活跃表，返回 `None`；
    /// 若是被 stop 打断（stop 看不到仍在加载的槽位），还要立即卸载。
    async fn acquire(&self, app: &str) -> Result<Option<Arc<AdapterInstancePair>>, PoolError> {
        let cached = self.lock_active().get(app).and_then(Weak::upgrade);
        if let Some(pair) = cached {
            tracing::debug!(adapter = app, "Reusing active adapter");
            return Ok(Some(pair));
        }

        let config = self.adapter_configs.get(app).cloned().unwrap_or_default();
        let pair = self.pool.get(app, &config).await?;
        let state = {
            // stop 先改状态再持锁清表，所以检查与写入必须在同一把锁内
            let mut active = self.lock_active();
            let state = self.status();
            if state == EngineState::Running {
                active.insert(app.to_string(), Arc::downgrade(&pair));
                tracing::info!(adapter = app, "Adapter acquired and marked active");
                return Ok(Some(pair));
            }
            state
        };
        drop(pair);

        // ERROR 下实例留在 Pool 中，由之后的 stop() 统一卸载
        if matches!(state, EngineState::Stopping | EngineState::Stopped) {
            tracing::warn!(adapter = app, %state, "Engine stopped while adapter was loading, unloading it");
            let report = self.pool.unload(app).await;
            if !report.close_errors.is_empty() {
                tracing::warn!(adapter = app, failures = report.close_errors.len(), "Adapter failed to close cleanly");
            }
        } else {
            tracing::warn!(adapter = app, %state, "Engine left RUNNING while adapter was loading");
        }
        Ok(None)
    }

    /// 阶段开始前检查；状态已离开 RUNNING 时返回 Cancelled
    fn checkpoint(&self, phase: TaskPhase) -> Option<TaskOutcome> {
        let state = self.status();
        if state == EngineState::Running {
            return None;
        }
        tracing::warn!(%phase, %state, "Engine left RUNNING state, task interrupted");
        Some(TaskOutcome::Cancelled { phase, state })
    }

    fn task_failed(&self, task_id: &str, phase: TaskPhase, source: AdapterError) -> EngineError {
        tracing::error!(%phase, error = %source, "Task failed");
        self.fail();
        EngineError::Task {
            task_id: task_id.to_string(),
            phase,
            source,
        }
    }

    /// RUNNING → ERROR；其它状态（例如并发 stop 中）保持不变
    fn fail(&self) {
        if !self.transition(EngineState::Running, EngineState::Error) {
            tracing::debug!(state = %self.status(), "Not marking engine as ERROR, state already changed");
        }
    }

    fn transition(&self, from: EngineState, to: EngineState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, Weak<AdapterInstancePair>>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }
}
