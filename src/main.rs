mod cli;
mod logging;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, ConfigPaths};
use watchcat::checkpoint::CheckpointStore;
use watchcat::config::WatchcatConfig;
use watchcat::datastore::SqliteDatastore;
use watchcat::workflow::Automaton;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { paths, develop } => run(&paths, develop, cli.verbose, cli.max_retries).await,
        Command::Status { paths } => status(&paths),
    }
}

async fn run(paths: &ConfigPaths, develop: bool, verbose: bool, max_retries: Option<u32>) -> anyhow::Result<()> {
    let mut config = WatchcatConfig::load(&paths.config, &paths.env)?;
    if let Some(max_retries) = max_retries {
        config.automaton.max_retries = max_retries;
    }

    let level = if verbose || develop { "debug" } else { "info" };
    let _guard = logging::init(level, develop, Path::new(&config.logging.directory))
        .context("failed to initialize logging")?;

    let mut automaton = Automaton::open(config)?.with_observer(ui::RunProgress::start());
    automaton.run().await.context("workflow terminated")?;
    Ok(())
}

fn status(paths: &ConfigPaths) -> anyhow::Result<()> {
    let config = WatchcatConfig::load(&paths.config, &paths.env)?;
    let datastore = SqliteDatastore::open(Path::new(&config.datastore.path))
        .with_context(|| format!("failed to open {}", config.datastore.path))?;
    let store = CheckpointStore::new(Arc::new(datastore), config.datastore.retain_checkpoints);
    ui::print_status(store.latest_summary().as_ref());
    Ok(())
}
