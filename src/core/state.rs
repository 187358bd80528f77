//! 引擎生命周期状态
//!
//! IDLE → STARTING → RUNNING → STOPPING → STOPPED，任意运行期失败进入 ERROR；
//! 只有 stop() 能离开 ERROR。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }

    /// start() 只接受 IDLE / STOPPED
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// stop() 需要执行关闭流程的状态
    pub fn needs_shutdown(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Error)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PCA 循环的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Perception,
    Cognition,
    Action,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Perception => "perception",
            Self::Cognition => "cognition",
            Self::Action => "action",
        };
        f.write_str(s)
    }
}
