use std::fmt;

use serde::{Deserialize, Serialize};

/// The six states of the workflow automaton.
///
/// Each run flows through: INIT → PULLING → SUMMARIZING → EVALUATING → FEEDBACK → DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Init,
    Pulling,
    Summarizing,
    Evaluating,
    Feedback,
    Done,
}

impl WorkflowState {
    /// The state entered after this one completes normally. `Done` has none.
    pub fn successor(self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Init => Some(WorkflowState::Pulling),
            WorkflowState::Pulling => Some(WorkflowState::Summarizing),
            WorkflowState::Summarizing => Some(WorkflowState::Evaluating),
            WorkflowState::Evaluating => Some(WorkflowState::Feedback),
            WorkflowState::Feedback => Some(WorkflowState::Done),
            WorkflowState::Done => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkflowState::Done
    }

    /// Stages a restored checkpoint can resume into.
    pub fn is_mid_pipeline(self) -> bool {
        matches!(
            self,
            WorkflowState::Pulling
                | WorkflowState::Summarizing
                | WorkflowState::Evaluating
                | WorkflowState::Feedback
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Init => "init",
            WorkflowState::Pulling => "pulling",
            WorkflowState::Summarizing => "summarizing",
            WorkflowState::Evaluating => "evaluating",
            WorkflowState::Feedback => "feedback",
            WorkflowState::Done => "done",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
