//! 日志初始化：控制台 + 可选的按天滚动文件

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

/// 初始化全局 subscriber；返回的 guard 需要在 main 中持有到退出，否则文件日志可能丢失
///
/// 过滤级别：RUST_LOG 优先，否则使用配置中的 level。
pub fn init(cfg: &LoggingSection) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cfg.level))?;

    let console = cfg.console.then(fmt::layer);

    let (file, guard) = if cfg.file_enabled {
        std::fs::create_dir_all(&cfg.dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, &cfg.dir, &cfg.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    if guard.is_some() {
        tracing::info!(dir = %cfg.dir.display(), prefix = %cfg.file_prefix, "File logging enabled");
    }
    Ok(guard)
}
