//! 优雅关闭
//!
//! ShutdownManager 是服务端的显式句柄：Ctrl+C、SIGTERM 与远程 Shutdown RPC 都通过它触发关闭。
//! 服务退出后由 ShutdownCoordinator 执行清理任务（停止引擎、卸载适配器）。

use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::engine::CoreEngine;
use crate::plugins::AdapterInstancePool;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
    /// 第一次触发的原因；之后的触发只记录日志
    first_reason: Arc<OnceLock<ShutdownReason>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 客户端通过 AdapterControl.Shutdown 请求
    Remote,
    /// 服务自身出错退出
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
            first_reason: Arc::new(OnceLock::new()),
        }
    }

    /// 获取关闭 token（serve 用它结束 accept 循环）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭；只有第一次调用返回 true
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.first_reason.set(reason.clone()).is_err() {
            tracing::debug!(?reason, "Shutdown already triggered, ignoring");
            return false;
        }
        tracing::info!(?reason, "Shutdown triggered");
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.first_reason.get().cloned()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务，每个任务单独限时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 执行所有清理任务；失败或超时只记录，不中断后续任务
    pub async fn run_cleanup(&self) {
        tracing::info!(
            tasks = self.cleanup_tasks.len(),
            reason = ?self.manager.reason(),
            "Running cleanup tasks..."
        );

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!(task = name, "Cleanup task completed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "Cleanup task failed");
                }
                Err(_) => {
                    tracing::warn!(task = name, timeout = ?self.timeout, "Cleanup task timed out");
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 关闭时停止引擎（清空活跃表并卸载全部适配器）
pub struct EngineCleanup {
    engine: Arc<CoreEngine>,
}

impl EngineCleanup {
    pub fn new(engine: Arc<CoreEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for EngineCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.engine.stop().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CoreEngine"
    }
}

/// 卸载实例池中剩余的适配器（例如只通过 Initialize RPC 加载、引擎从未启动的情况）
pub struct PoolCleanup {
    pool: Arc<AdapterInstancePool>,
}

impl PoolCleanup {
    pub fn new(pool: Arc<AdapterInstancePool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for PoolCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let failures: usize = self
            .pool
            .unload_all()
            .await
            .iter()
            .map(|r| r.close_errors.len())
            .sum();
        if failures > 0 {
            anyhow::bail!("{failures} adapter(s) failed to close");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AdapterInstancePool"
    }
}
