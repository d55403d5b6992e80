//! Saída no terminal: um spinner que acompanha o autômato e a visão de status.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use watchcat::checkpoint::CheckpointSummary;
use watchcat::error::AutomatonError;
use watchcat::workflow::{WorkflowData, WorkflowObserver, WorkflowState};

/// Spinner que mostra o estado atual e as retentativas de uma execução.
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    pub fn start() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("init");
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl WorkflowObserver for RunProgress {
    fn state_entered(&self, state: WorkflowState) {
        self.pb.set_message(state.to_string());
    }

    fn stage_retried(&self, state: WorkflowState, retry: u32, max_retries: u32, error: &AutomatonError) {
        self.pb.println(format!(
            "  {} Retry {retry}/{max_retries} of {state}: {error}",
            self.yellow.apply_to("↻")
        ));
    }

    fn finished(&self, data: &WorkflowData, error: Option<&AutomatonError>) {
        self.pb.finish_and_clear();
        match error {
            None => println!(
                "  {} Pulled {} posts, {} insights, {} notifications",
                self.green.apply_to("✓"),
                data.pulled_posts.len(),
                data.processed_insights.len(),
                data.notifications_sent.len()
            ),
            Some(e) => println!("  {} Workflow terminated: {e}", self.red.apply_to("✗")),
        }
    }
}

/// Imprime o resumo do último checkpoint, ou avisa que não há nenhum.
pub fn print_status(summary: Option<&CheckpointSummary>) {
    let Some(summary) = summary else {
        println!("No checkpoint yet.");
        return;
    };

    let style = match (&summary.last_error, summary.state) {
        (Some(_), _) => Style::new().red().bold(),
        (None, WorkflowState::Done) => Style::new().green().bold(),
        (None, _) => Style::new().yellow(),
    };
    println!("{}", style.apply_to(format!("─── {} ───", summary.state)));
    println!("{}", serde_json::to_string_pretty(summary).unwrap_or_default());
}
