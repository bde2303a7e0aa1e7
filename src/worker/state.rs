//! Per-run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::worker::context::ContextHistory;

/// Status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created, no prompt attempted yet.
    Initialized,
    /// Prompts are being worked through.
    Running,
    /// At least one prompt completed.
    Completed,
    /// No prompt completed.
    Failed,
}

impl RunStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        use RunStatus::*;

        matches!(
            (self, target),
            (Initialized, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// State of a single run, owned by the worker executing it.
///
/// A fresh value is built for every run; the context history dies with it.
#[derive(Debug)]
pub struct RunState {
    pub sequence: String,
    pub model: String,
    /// 1-based run number.
    pub run_number: u32,
    /// Index of the prompt currently being attempted.
    pub prompt_index: usize,
    pub context: ContextHistory,
    pub error_count: usize,
    pub completed_prompts: usize,
    status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(sequence: impl Into<String>, model: impl Into<String>, run_number: u32) -> Self {
        Self {
            sequence: sequence.into(),
            model: model.into(),
            run_number,
            prompt_index: 0,
            context: ContextHistory::new(),
            error_count: 0,
            completed_prompts: 0,
            status: RunStatus::Initialized,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, target: RunStatus) -> Result<(), WorkerError> {
        if !self.status.can_transition_to(target) {
            return Err(WorkerError::InvalidTransition {
                run: self.run_number,
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }

        self.status = target;
        match target {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            RunStatus::Completed | RunStatus::Failed => self.finished_at = Some(Utc::now()),
            RunStatus::Initialized => {}
        }
        Ok(())
    }

    /// Close the run: completed if any prompt succeeded, failed otherwise.
    pub fn finish(&mut self) -> Result<RunStatus, WorkerError> {
        let target = if self.completed_prompts > 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.transition_to(target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(RunStatus::Initialized.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!RunStatus::Initialized.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Initialized.is_terminal());
    }

    #[test]
    fn finish_depends_on_completed_prompts() {
        let mut run = RunState::new("noir", "gpt-4o", 1);
        run.transition_to(RunStatus::Running).unwrap();
        run.completed_prompts = 1;
        assert_eq!(run.finish().unwrap(), RunStatus::Completed);
        assert!(run.finished_at.is_some());

        let mut run = RunState::new("noir", "gpt-4o", 2);
        run.transition_to(RunStatus::Running).unwrap();
        run.error_count = 3;
        assert_eq!(run.finish().unwrap(), RunStatus::Failed);
    }

    #[test]
    fn finish_requires_running() {
        let mut run = RunState::new("noir", "gpt-4o", 1);
        assert!(matches!(
            run.finish(),
            Err(WorkerError::InvalidTransition { run: 1, .. })
        ));
    }

    #[test]
    fn new_run_starts_clean() {
        let run = RunState::new("noir", "gpt-4o", 3);
        assert_eq!(run.status(), RunStatus::Initialized);
        assert!(run.context.is_empty());
        assert_eq!(run.prompt_index, 0);
    }

    #[test]
    fn run_status_serde() {
        let json = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!(RunStatus::Initialized.to_string(), "initialized");
    }
}
