use thiserror::Error;

use crate::types::AgentState;

/// Failures raised by the observer, decision client and executor.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no active tab found")]
    NoActiveTab,
    #[error("cannot capture screenshot of restricted page: {url}")]
    RestrictedPage { url: String },
    #[error("failed to capture screenshot: {0}")]
    Screenshot(String),
    #[error("failed to extract interactive elements: {0}")]
    Extraction(String),
    #[error("gemini API key not configured")]
    MissingApiKey,
    #[error("decision service error ({status}): {message}")]
    DecisionService { status: u16, message: String },
    #[error("decision service request failed: {0}")]
    Network(String),
    #[error("decision service returned no text")]
    EmptyResponse,
    #[error("failed to parse model response: {reason}")]
    Parse { reason: String, raw: String },
    #[error("browser command failed: {0}")]
    Browser(String),
}

impl AgentError {
    pub(crate) fn parse(reason: impl Into<String>, raw: &str) -> Self {
        AgentError::Parse {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }

    /// Raw model reply, for parse failures.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AgentError::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Network(e.to_string())
    }
}

/// Terminal failure of one agent run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("step {step} failed while {phase}: {source}")]
    Failed {
        step: usize,
        phase: AgentState,
        #[source]
        source: AgentError,
    },
    #[error("reached maximum steps ({max_steps}) without completion")]
    StepBudgetExceeded { max_steps: usize },
}

impl RunError {
    pub fn phase(&self) -> AgentState {
        match self {
            RunError::Failed { phase, .. } => *phase,
            RunError::StepBudgetExceeded { .. } => AgentState::Exhausted,
        }
    }
}
