use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use watchcat::config::{DEFAULT_CONFIG_PATH, DEFAULT_ENV_PATH};

/// watchcat: vigia fontes de pesquisa e avisa o que importa.
#[derive(Debug, Parser)]
#[command(name = "watchcat", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Retentativas permitidas por estágio, sobrepondo `automaton.max_retries`.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Log em nível debug.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ConfigPaths {
    /// Arquivo de configuração principal.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Arquivo de segredos mesclado sobre a configuração, se existir.
    #[arg(long, default_value = DEFAULT_ENV_PATH)]
    pub env: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um ciclo do pipeline, retomando do último checkpoint.
    Run {
        #[command(flatten)]
        paths: ConfigPaths,

        /// Log apenas no terminal, em nível debug.
        #[arg(long, default_value_t = false)]
        develop: bool,
    },

    /// Mostra o checkpoint mais recente.
    Status {
        #[command(flatten)]
        paths: ConfigPaths,
    },
}
