//! The observe → decide → act loop.
//!
//! Each iteration observes the active page, asks the decision client for one
//! action, executes it and reports the finished step. The loop is strictly
//! sequential and stops on `done`, on the first error, or when the step
//! budget runs out. Errors are never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::brain::DecisionClient;
use crate::error::{AgentError, RunError};
use crate::hands::ActionExecutor;
use crate::observer::PageObserver;
use crate::types::{AgentState, AgentStep, AgentTask, Command, TaskOutcome};

/// Receives every completed step. Called synchronously from the loop, so
/// implementations must return quickly.
pub trait ProgressSink: Send {
    fn on_step(&mut self, step: &AgentStep);
}

impl<F> ProgressSink for F
where
    F: FnMut(&AgentStep) + Send,
{
    fn on_step(&mut self, step: &AgentStep) {
        (self)(step)
    }
}

/// Bounded channel sink. A full channel drops the event instead of stalling
/// the loop.
pub struct ChannelProgress(pub mpsc::Sender<AgentStep>);

impl ProgressSink for ChannelProgress {
    fn on_step(&mut self, step: &AgentStep) {
        if let Err(e) = self.0.try_send(step.clone()) {
            warn!(step = step.step_number, error = %e, "progress event dropped");
        }
    }
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_step(&mut self, _step: &AgentStep) {}
}

/// Wires the three collaborators together.
pub struct BrowserAgent {
    observer: Arc<dyn PageObserver>,
    brain: Arc<dyn DecisionClient>,
    executor: Arc<dyn ActionExecutor>,
    settle: Duration,
}

impl BrowserAgent {
    pub fn new(
        observer: Arc<dyn PageObserver>,
        brain: Arc<dyn DecisionClient>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            observer,
            brain,
            executor,
            settle: Duration::from_millis(1500),
        }
    }

    /// Pause after each executed action before observing again.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Run a fresh task and return the `done` result.
    pub async fn run(
        &self,
        description: &str,
        max_steps: usize,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, RunError> {
        let mut task = AgentTask::new(description, max_steps);
        self.run_task(&mut task, progress).await
    }

    /// Drive `task` to a terminal state. On return `task.state`,
    /// `task.outcome` and `task.history` describe the run.
    pub async fn run_task(
        &self,
        task: &mut AgentTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, RunError> {
        info!(task = %task.description, max_steps = task.max_steps, "starting task");

        let result = self.drive(task, progress).await;
        match &result {
            Ok(value) => {
                task.state = AgentState::Done;
                task.outcome = Some(TaskOutcome::Succeeded(value.clone()));
                info!(steps = task.history.len(), result = %value, "task completed");
            }
            Err(e) => {
                task.state = match e {
                    RunError::StepBudgetExceeded { .. } => AgentState::Exhausted,
                    RunError::Failed { .. } => AgentState::Failed,
                };
                task.outcome = Some(TaskOutcome::Failed(e.to_string()));
                warn!(steps = task.history.len(), error = %e, "task did not complete");
            }
        }
        result
    }

    async fn drive(
        &self,
        task: &mut AgentTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, RunError> {
        for step_number in 1..=task.max_steps {
            info!(step = step_number, max = task.max_steps, "step");

            task.state = AgentState::Observing;
            let observation = self
                .observer
                .observe()
                .await
                .map_err(|e| failed(step_number, AgentState::Observing, e))?;

            task.state = AgentState::Deciding;
            let action = self
                .brain
                .decide(&task.description, &observation, &task.history)
                .await
                .map_err(|e| failed(step_number, AgentState::Deciding, e))?;
            info!(
                step = step_number,
                action = %action.command,
                thought = action.thought.as_deref().unwrap_or(""),
                "decided"
            );

            if let Command::Done(done) = &action.command {
                let result = done.result.clone();
                record(task, progress, AgentStep::new(step_number, observation, action));
                return Ok(result);
            }

            task.state = AgentState::Acting;
            self.executor
                .execute(&action)
                .await
                .map_err(|e| failed(step_number, AgentState::Acting, e))?;
            record(task, progress, AgentStep::new(step_number, observation, action));

            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
        }

        Err(RunError::StepBudgetExceeded {
            max_steps: task.max_steps,
        })
    }
}

fn failed(step: usize, phase: AgentState, source: AgentError) -> RunError {
    RunError::Failed {
        step,
        phase,
        source,
    }
}

fn record(task: &mut AgentTask, progress: &mut dyn ProgressSink, step: AgentStep) {
    task.history.push(step);
    if let Some(step) = task.history.last() {
        progress.on_step(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, DomInfo, Observation, Screenshot};

    fn step(n: usize) -> AgentStep {
        let obs = Observation::new(Screenshot::png(String::new()), DomInfo::default());
        let action = Action::new(Command::Unknown {
            name: "noop".into(),
            params: serde_json::Value::Null,
        });
        AgentStep::new(n, obs, action)
    }

    #[test]
    fn closure_sink_sees_each_step() {
        let mut seen = Vec::new();
        {
            let mut sink = |s: &AgentStep| seen.push(s.step_number);
            sink.on_step(&step(1));
            sink.on_step(&step(2));
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelProgress(tx);
        sink.on_step(&step(1));
        sink.on_step(&step(2));
        drop(sink);

        assert_eq!(rx.recv().await.map(|s| s.step_number), Some(1));
        assert!(rx.recv().await.is_none());
    }
}
