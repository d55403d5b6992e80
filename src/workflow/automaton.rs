//! The finite-state automaton that drives one pipeline cycle.
//!
//! Every stage works on a copy of the accumulated [`WorkflowData`]. The copy
//! becomes the automaton's data only once the checkpoint for the next state
//! is saved, so a failed stage or a failed checkpoint write leaves the
//! automaton exactly where it was and the stage can simply run again.

use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Insight, Notification, WorkflowData, WorkflowState};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::WatchcatConfig;
use crate::datastore::{Datastore, SqliteDatastore};
use crate::error::{AutomatonError, Result};
use crate::plugins::{PluginContext, PluginFactory, PluginRegistry};
use crate::post::Post;

/// Hooks for following a run from the outside, e.g. a terminal spinner.
pub trait WorkflowObserver: Send + Sync {
    fn state_entered(&self, _state: WorkflowState) {}

    /// A stage failed and will run again after its backoff delay.
    fn stage_retried(&self, _state: WorkflowState, _retry: u32, _max_retries: u32, _error: &AutomatonError) {}

    /// The run reached `Done`, with the error that forced it there, if any.
    fn finished(&self, _data: &WorkflowData, _error: Option<&AutomatonError>) {}
}

/// What a stage hands back when it succeeds.
struct Staged {
    run_id: Uuid,
    data: WorkflowData,
    /// Set by `Init` when a checkpoint names a later stage to resume at.
    resume_at: Option<WorkflowState>,
}

pub struct Automaton {
    config: WatchcatConfig,
    factory: Arc<PluginFactory>,
    datastore: Arc<dyn Datastore>,
    checkpoints: CheckpointStore,
    registry: Option<PluginRegistry>,
    observer: Option<Box<dyn WorkflowObserver>>,
    state: WorkflowState,
    run_id: Uuid,
    retry_count: u32,
    data: WorkflowData,
    history: Vec<WorkflowState>,
    last_error: Option<AutomatonError>,
}

impl Automaton {
    pub fn new(config: WatchcatConfig, datastore: Arc<dyn Datastore>, factory: PluginFactory) -> Self {
        let checkpoints = CheckpointStore::new(datastore.clone(), config.datastore.retain_checkpoints);
        Self {
            config,
            factory: Arc::new(factory),
            datastore,
            checkpoints,
            registry: None,
            observer: None,
            state: WorkflowState::Init,
            run_id: Uuid::new_v4(),
            retry_count: 0,
            data: WorkflowData::default(),
            history: Vec::new(),
            last_error: None,
        }
    }

    /// Open the configured SQLite datastore and use the built-in plugin kinds.
    pub fn open(config: WatchcatConfig) -> Result<Self> {
        let datastore = SqliteDatastore::open(Path::new(&config.datastore.path)).map_err(|e| {
            AutomatonError::Configuration(format!(
                "failed to open datastore {}: {e}",
                config.datastore.path
            ))
        })?;
        let factory = PluginFactory::with_builtins(PluginContext::from_config(&config)?);
        Ok(Self::new(config, Arc::new(datastore), factory))
    }

    pub fn with_observer(mut self, observer: impl WorkflowObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Every state entered so far, retries included.
    pub fn history(&self) -> &[WorkflowState] {
        &self.history
    }

    pub fn data(&self) -> &WorkflowData {
        &self.data
    }

    pub fn last_error(&self) -> Option<&AutomatonError> {
        self.last_error.as_ref()
    }

    pub fn registry(&self) -> Option<&PluginRegistry> {
        self.registry.as_ref()
    }

    /// Drive the pipeline until `Done`.
    ///
    /// Returns the error that exhausted the retry budget of a stage, or the
    /// first fatal error. Either way the automaton is `Done` afterwards and a
    /// terminal checkpoint has been attempted.
    pub async fn run(&mut self) -> Result<()> {
        info!(run_id = %self.run_id, "Starting workflow");

        while !self.state.is_terminal() {
            let state = self.state;
            self.enter(state);

            let staged = Staged {
                run_id: self.run_id,
                data: self.data.clone(),
                resume_at: None,
            };
            let outcome = match self.execute(state, staged).await {
                Ok(staged) => {
                    let next = staged
                        .resume_at
                        .or_else(|| state.successor())
                        .unwrap_or(WorkflowState::Done);
                    self.commit(next, staged)
                }
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                self.handle_failure(state, e).await?;
            }
        }

        self.enter(WorkflowState::Done);
        info!(
            run_id = %self.run_id,
            posts = self.data.pulled_posts.len(),
            insights = self.data.processed_insights.len(),
            notifications = self.data.notifications_sent.len(),
            "Workflow complete"
        );
        if let Some(observer) = &self.observer {
            observer.finished(&self.data, None);
        }
        Ok(())
    }

    fn enter(&mut self, state: WorkflowState) {
        info!(state = %state, run_id = %self.run_id, "Transitioning to state");
        self.history.push(state);
        if let Some(observer) = &self.observer {
            observer.state_entered(state);
        }
    }

    async fn execute(&mut self, state: WorkflowState, staged: Staged) -> Result<Staged> {
        match state {
            WorkflowState::Init => self.initialize(staged),
            WorkflowState::Pulling => self.pull(staged).await,
            WorkflowState::Summarizing => Ok(self.summarize(staged).await),
            WorkflowState::Evaluating => Ok(self.evaluate(staged)),
            WorkflowState::Feedback => Ok(self.feedback(staged).await),
            WorkflowState::Done => Ok(staged),
        }
    }

    /// Save the snapshot for `next`, then adopt the staged data.
    fn commit(&mut self, next: WorkflowState, staged: Staged) -> Result<()> {
        let checkpoint = Checkpoint::capture(staged.run_id, next, 0, &staged.data);
        self.checkpoints.save(&checkpoint)?;

        self.run_id = staged.run_id;
        self.data = staged.data;
        self.state = next;
        self.retry_count = 0;
        Ok(())
    }

    async fn handle_failure(&mut self, state: WorkflowState, error: AutomatonError) -> Result<()> {
        self.retry_count += 1;
        let max_retries = self.config.automaton.max_retries;

        if error.is_fatal() {
            error!(state = %state, error = %error, critical = true, "Fatal error, workflow terminated");
            return self.terminate(error);
        }

        if self.retry_count <= max_retries {
            let delay = self.config.automaton.delay_for_retry(self.retry_count);
            warn!(
                state = %state,
                retry = self.retry_count,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Stage failed, retrying"
            );
            if let Some(observer) = &self.observer {
                observer.stage_retried(state, self.retry_count, max_retries, &error);
            }
            sleep(delay).await;
            return Ok(());
        }

        error!(
            state = %state,
            retries = max_retries,
            error = %error,
            critical = true,
            "Max retries exceeded, workflow terminated"
        );
        self.terminate(error)
    }

    /// Force `Done`, leave a best-effort terminal checkpoint and hand the
    /// error back to the caller.
    fn terminate(&mut self, error: AutomatonError) -> Result<()> {
        self.state = WorkflowState::Done;
        self.history.push(WorkflowState::Done);
        if let Some(observer) = &self.observer {
            observer.state_entered(WorkflowState::Done);
        }

        let checkpoint = Checkpoint::capture(self.run_id, WorkflowState::Done, self.retry_count, &self.data)
            .with_error(&error);
        if let Err(e) = self.checkpoints.save(&checkpoint) {
            error!(error = %e, "Failed to save terminal checkpoint");
        }

        if let Some(observer) = &self.observer {
            observer.finished(&self.data, Some(&error));
        }
        self.last_error = Some(error.clone());
        Err(error)
    }

    fn initialize(&mut self, mut staged: Staged) -> Result<Staged> {
        self.config.validate()?;

        if let Some(checkpoint) = self.checkpoints.restore() {
            if checkpoint.state.is_mid_pipeline() {
                info!(state = %checkpoint.state, run_id = %checkpoint.run_id, "Resuming from checkpoint");
                staged.resume_at = Some(checkpoint.state);
                staged.run_id = checkpoint.run_id;
                staged.data = checkpoint.into_data();
            } else {
                info!(previous_run = %checkpoint.run_id, "Previous cycle finished, starting a new one");
                staged.data = checkpoint.into_data();
                staged.data.start_cycle();
            }
        }

        self.registry = Some(PluginRegistry::register_all(&self.config, self.factory.clone())?);
        info!("Initialization complete");
        Ok(staged)
    }

    async fn pull(&self, mut staged: Staged) -> Result<Staged> {
        let registry = self.active_registry()?;
        staged.data.pulled_posts.clear();

        for source in registry.sources() {
            let filters = registry.filters_for(source.id());
            info!(source = source.id(), filters = filters.len(), "Pulling from source");

            let posts = match source.pull(&filters).await {
                Ok(posts) => posts,
                Err(e) => {
                    error!(source = source.id(), error = %e, "Failed to pull from source");
                    continue;
                }
            };

            let pulled = posts.len();
            for post in posts {
                if let Err(e) = self.datastore.store_post(&post) {
                    error!(post = post.id(), source = source.id(), error = %e, "Failed to store post");
                    continue;
                }
                staged.data.pulled_posts.push(post);
            }
            info!(source = source.id(), posts = pulled, "Source complete");
        }

        info!(total = staged.data.pulled_posts.len(), "Data pulling complete");
        Ok(staged)
    }

    async fn summarize(&self, mut staged: Staged) -> Staged {
        staged.data.processed_insights.clear();

        for post in &staged.data.pulled_posts {
            let insight = match self.process_post(post).await {
                Ok(insight) => insight,
                Err(e) => {
                    error!(post = post.id(), error = %e, "Failed to process post");
                    continue;
                }
            };
            if let Err(e) = self.datastore.store_insight(&insight) {
                error!(post = post.id(), error = %e, "Failed to store insight");
                continue;
            }
            staged.data.processed_insights.push(insight);
        }

        info!(insights = staged.data.processed_insights.len(), "Processing complete");
        staged
    }

    /// Run one post through every processor. Any processor failure fails the
    /// post; the last reported relevance wins.
    async fn process_post(&self, post: &Post) -> Result<Insight> {
        let mut insight = Insight::for_post(post);
        let Some(registry) = &self.registry else {
            return Ok(insight);
        };

        for processor in registry.processors() {
            let output = processor.process(post).await?;
            if let Some(relevance) = output.relevance {
                insight.relevance_score = relevance;
            }
            insight.metadata.insert(processor.id().to_string(), output.data);
        }
        Ok(insight)
    }

    fn evaluate(&self, mut staged: Staged) -> Staged {
        let insights = &staged.data.processed_insights;
        let user_model = &mut staged.data.user_model;

        let mut metrics = match user_model.remove("metrics") {
            Some(Value::Object(metrics)) => metrics,
            Some(other) => {
                warn!(metrics = %other, "User model metrics were not an object, resetting");
                Map::new()
            }
            None => Map::new(),
        };

        let total = metrics
            .get("total_insights_generated")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + insights.len() as u64;
        metrics.insert("total_insights_generated".into(), json!(total));
        metrics.insert(
            "last_update".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );

        let mut by_source = match metrics.remove("insights_by_source") {
            Some(Value::Object(by_source)) => by_source,
            _ => Map::new(),
        };
        for insight in insights {
            let count = by_source.get(&insight.source).and_then(Value::as_u64).unwrap_or(0);
            by_source.insert(insight.source.clone(), json!(count + 1));
        }
        metrics.insert("insights_by_source".into(), Value::Object(by_source));

        let runs = metrics.get("runs_completed").and_then(Value::as_u64).unwrap_or(0);
        metrics.insert("runs_completed".into(), json!(runs + 1));

        user_model.insert("metrics".into(), Value::Object(metrics));
        info!(insights = insights.len(), total, "User model updated");
        staged
    }

    async fn feedback(&self, mut staged: Staged) -> Staged {
        let notifiers = self.registry.as_ref().map(PluginRegistry::notifiers).unwrap_or_default();
        let channels: Vec<String> = notifiers.iter().map(|n| n.id().to_string()).collect();
        let threshold = self.config.feedback.relevance_threshold;

        let insights = &staged.data.processed_insights;
        let mut pending = Vec::new();
        if !insights.is_empty() {
            pending.push(Notification::info(
                format!("Processed {} insights", insights.len()),
                channels.clone(),
            ));
        }
        let pulled = staged.data.pulled_posts.len();
        let unprocessed = pulled.saturating_sub(insights.len());
        if unprocessed > 0 {
            pending.push(Notification::warning(
                format!("{unprocessed} of {pulled} posts could not be processed"),
                channels.clone(),
            ));
        }
        for insight in insights.iter().filter(|i| i.relevance_score >= threshold) {
            pending.push(Notification::info(
                format!(
                    "Relevant post {} from {} (relevance {:.2})",
                    insight.post_id, insight.source, insight.relevance_score
                ),
                channels.clone(),
            ));
        }

        for mut notification in pending {
            for notifier in notifiers {
                match notifier.notify(&notification).await {
                    Ok(()) => notification.delivered_to.push(notifier.id().to_string()),
                    Err(e) => error!(notifier = notifier.id(), error = %e, "Failed to send notification"),
                }
            }
            staged.data.notifications_sent.push(notification);
        }

        info!(sent = staged.data.notifications_sent.len(), "Feedback processing complete");
        staged
    }
}

impl Automaton {
    fn active_registry(&self) -> Result<&PluginRegistry> {
        self.registry
            .as_ref()
            .ok_or_else(|| AutomatonError::Plugin("plugin registry not initialized".into()))
    }
}
