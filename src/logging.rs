use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`. Outside develop mode every event is also
/// written as JSON lines to a daily file under `directory`; keep the
/// returned guard alive until exit so the file gets flushed.
pub fn init(level: &str, develop: bool, directory: &Path) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if develop {
        tracing_subscriber::registry().with(env_filter).with(console).init();
        return Ok(None);
    }

    std::fs::create_dir_all(directory)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        directory,
        "watchcat.jsonl",
    ));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(fmt::layer().json().with_writer(writer))
        .init();
    Ok(Some(guard))
}
