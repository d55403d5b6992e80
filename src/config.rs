//! Configuração do watchcat carregada de `watchcat.config.toml` e `watchcat.env.toml`.
//!
//! O arquivo env é mesclado recursivamente sobre o arquivo de configuração,
//! assim os segredos ficam separados das configurações compartilhadas.
//! Valores ausentes nos dois arquivos usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre `api_key`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AutomatonError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "watchcat.config.toml";
pub const DEFAULT_ENV_PATH: &str = "watchcat.env.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchcatConfig {
    /// Chave da API Anthropic usada pelos processadores baseados em LLM.
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub automaton: AutomatonSettings,

    #[serde(default)]
    pub datastore: DatastoreSettings,

    /// Parâmetros de backoff das chamadas envolvidas por um `RetryExecutor`.
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub feedback: FeedbackSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Entradas `[sources.<id>]`. Mantidas como valor bruto para que uma seção
    /// malformada seja reportada pelo registro de plugins.
    #[serde(default = "empty_section")]
    pub sources: toml::Value,

    #[serde(default = "empty_section")]
    pub processors: toml::Value,

    #[serde(default = "empty_section")]
    pub notifiers: toml::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomatonSettings {
    /// Retentativas permitidas por estado antes de encerrar a execução.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos entre retentativas, dobrado a cada vez.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreSettings {
    #[serde(default = "default_datastore_path")]
    pub path: String,

    /// Número de checkpoints mantidos após cada gravação.
    #[serde(default = "default_retain_checkpoints")]
    pub retain_checkpoints: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    #[serde(default = "default_decrement_ms")]
    pub decrement_ms: u64,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSettings {
    /// Insights com relevância igual ou acima deste valor recebem notificação própria.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Diretório que recebe os logs JSON-lines fora do modo develop.
    #[serde(default = "default_log_directory")]
    pub directory: String,
}

fn empty_section() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_datastore_path() -> String {
    "watchcat.db".to_string()
}

fn default_retain_checkpoints() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_growth_factor() -> f64 {
    2.0
}

fn default_decrement_ms() -> u64 {
    10_000
}

fn default_initial_delay_ms() -> u64 {
    10_000
}

fn default_relevance_threshold() -> f64 {
    0.8
}

fn default_log_directory() -> String {
    "logs".to_string()
}

impl Default for AutomatonSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl AutomatonSettings {
    /// delay = base_delay_ms * 2^(retry - 1)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            path: default_datastore_path(),
            retain_checkpoints: default_retain_checkpoints(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            growth_factor: default_growth_factor(),
            decrement_ms: default_decrement_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            growth_factor: self.growth_factor,
            decrement: Duration::from_millis(self.decrement_ms),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: default_relevance_threshold(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
        }
    }
}

impl Default for WatchcatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            automaton: AutomatonSettings::default(),
            datastore: DatastoreSettings::default(),
            retry: RetrySettings::default(),
            feedback: FeedbackSettings::default(),
            logging: LoggingSettings::default(),
            sources: empty_section(),
            processors: empty_section(),
            notifiers: empty_section(),
        }
    }
}

impl WatchcatConfig {
    /// Carrega o arquivo de configuração (obrigatório) e mescla o arquivo env (opcional) sobre ele.
    pub fn load(config_path: &Path, env_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(AutomatonError::Configuration(format!(
                "configuration file not found: {}",
                config_path.display()
            )));
        }
        let mut merged = read_table(config_path)?;
        if env_path.exists() {
            deep_merge(&mut merged, read_table(env_path)?);
        }

        let mut config = Self::from_table(merged)?;

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn from_table(table: toml::Table) -> Result<Self> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| AutomatonError::Configuration(format!("invalid configuration: {e}")))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AutomatonError::Configuration(format!("invalid configuration: {e}")))
    }

    /// Rejeita configurações com as quais o autômato não consegue rodar.
    pub fn validate(&self) -> Result<()> {
        if self.datastore.path.trim().is_empty() {
            return Err(AutomatonError::Configuration(
                "datastore.path must not be empty".into(),
            ));
        }
        if self.datastore.retain_checkpoints == 0 {
            return Err(AutomatonError::Configuration(
                "datastore.retain_checkpoints must be at least 1".into(),
            ));
        }
        if !self.retry.growth_factor.is_finite() || self.retry.growth_factor < 1.0 {
            return Err(AutomatonError::Configuration(format!(
                "retry.growth_factor must be a finite number >= 1.0, got {}",
                self.retry.growth_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.feedback.relevance_threshold) {
            return Err(AutomatonError::Configuration(format!(
                "feedback.relevance_threshold must be within [0, 1], got {}",
                self.feedback.relevance_threshold
            )));
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AutomatonError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    contents.parse::<toml::Table>().map_err(|e| {
        AutomatonError::Configuration(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Mescla `overlay` em `base`, recursivamente nas tabelas presentes em ambos.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(toml::Value::Table(mut existing)), toml::Value::Table(incoming)) => {
                deep_merge(&mut existing, incoming);
                toml::Value::Table(existing)
            }
            (_, value) => value,
        };
        base.insert(key, merged);
    }
}
