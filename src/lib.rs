//! Browser agent: observe the page, ask Gemini for the next action, act,
//! repeat until the model says `done` or the step budget runs out.

pub mod agent;
pub mod brain;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod gemini;
pub mod hands;
pub mod observer;
pub mod prompt;
pub mod types;

pub use agent::{BrowserAgent, ChannelProgress, NoProgress, ProgressSink};
pub use brain::{DecisionClient, GeminiBrain, parse_agent_response};
pub use config::{AgentConfig, GeminiSettings, SettleDelays};
pub use error::{AgentError, RunError};
pub use gemini::GeminiClient;
pub use hands::{ActionExecutor, BrowserSession, ChromeExecutor};
pub use observer::{ChromeObserver, PageObserver};
pub use types::{
    Action, AgentState, AgentStep, AgentTask, Command, DomInfo, InteractiveElement, Observation,
    Screenshot, TaskOutcome,
};
