//! The workflow automaton and the data it accumulates.

mod automaton;
mod record;
mod state;

pub use automaton::{Automaton, WorkflowObserver};
pub use record::{DEFAULT_RELEVANCE, Insight, Notification, NotificationKind, WorkflowData};
pub use state::WorkflowState;
