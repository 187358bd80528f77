//! 引擎错误类型

use thiserror::Error;

use super::state::{EngineState, TaskPhase};
use crate::plugins::{AdapterError, PoolError};

#[derive(Error, Debug)]
pub enum EngineError {
    /// 当前状态不允许该操作（例如 RUNNING 时再次 start）
    #[error("cannot {operation} engine in state {state}")]
    InvalidState { operation: &'static str, state: EngineState },

    /// 获取目标应用的适配器失败；引擎进入 ERROR
    #[error("failed to acquire adapters: {0}")]
    Acquisition(#[from] PoolError),

    /// PCA 循环某阶段失败；引擎进入 ERROR
    #[error("task {task_id} failed during {phase}: {source}")]
    Task {
        task_id: String,
        phase: TaskPhase,
        #[source]
        source: AdapterError,
    },
}
