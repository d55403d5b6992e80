//! watchcat pulls posts from configured sources, runs them through
//! processors and notifies about what it found, checkpointing after every
//! stage so an interrupted run resumes where it stopped.

pub mod anthropic;
pub mod checkpoint;
pub mod config;
pub mod datastore;
pub mod error;
pub mod filter;
pub mod plugins;
pub mod post;
pub mod retry;
pub mod workflow;

pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointSummary};
pub use config::WatchcatConfig;
pub use error::{AutomatonError, RetryExhaustedError};
pub use filter::SourceFilter;
pub use plugins::{PluginFactory, PluginRegistry};
pub use post::{Mail, Paper, Post, PostKind};
pub use retry::{RetryExecutor, RetryPolicy};
pub use workflow::{Automaton, WorkflowObserver, WorkflowState};
