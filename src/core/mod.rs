//! 核心层：引擎状态机、任务编排、认知接口、运行时组装、优雅关闭

pub mod builder;
pub mod cognition;
pub mod engine;
pub mod error;
pub mod shutdown;
pub mod state;

pub use builder::{Runtime, RuntimeBuilder};
pub use cognition::{Cognition, NoopCognition, PlannedAction};
pub use engine::{CoreEngine, TaskOutcome};
pub use error::EngineError;
pub use shutdown::{EngineCleanup, PoolCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{EngineState, TaskPhase};
