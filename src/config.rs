use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::types::DEFAULT_MAX_STEPS;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Settings shared by every subcommand. Flags fall back to the environment,
/// which `dotenvy` may have populated from `.env`.
#[derive(Debug, Clone, Args)]
pub struct AgentConfig {
    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "TARS_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    #[arg(long, default_value_t = 0.2)]
    pub temperature: f64,

    #[arg(long, default_value_t = 1000)]
    pub max_output_tokens: u32,

    /// Upper bound on loop iterations per task.
    #[arg(long, env = "TARS_MAX_STEPS", default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: usize,

    /// DevTools websocket of an already running Chrome,
    /// e.g. ws://127.0.0.1:9222/devtools/browser/<id>.
    #[arg(long = "attach", env = "TARS_CHROME_DEBUG_URL")]
    pub chrome_debug_url: Option<String>,

    #[arg(long)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Profile used when launching Chrome; logins persist across runs.
    #[arg(long)]
    pub profile_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn gemini(&self) -> GeminiSettings {
        GeminiSettings {
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
            base_url: self.gemini_base_url.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn profile_dir(&self) -> Option<PathBuf> {
        self.profile_dir.clone().or_else(|| {
            dirs::data_local_dir().map(|d| d.join("cpo-tars").join("agent-profile"))
        })
    }
}

/// Everything the Gemini client needs.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: 0.2,
            max_output_tokens: 1000,
        }
    }
}

/// Heuristic pauses that give the page time to react before the next
/// observation. They do not guarantee the page is stable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettleDelays {
    /// Between scrolling an element into view and clicking it.
    pub click_scroll: Duration,
    pub scroll: Duration,
    pub type_base: Duration,
    pub type_per_char: Duration,
    pub navigate: Duration,
    /// After every executed action, before looping.
    pub post_action: Duration,
}

impl SettleDelays {
    pub const NONE: SettleDelays = SettleDelays {
        click_scroll: Duration::ZERO,
        scroll: Duration::ZERO,
        type_base: Duration::ZERO,
        type_per_char: Duration::ZERO,
        navigate: Duration::ZERO,
        post_action: Duration::ZERO,
    };

    /// Typing is simulated per character, so the wait scales with length.
    pub fn after_typing(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.type_base + self.type_per_char.saturating_mul(chars)
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            click_scroll: Duration::from_millis(500),
            scroll: Duration::from_millis(1000),
            type_base: Duration::from_millis(500),
            type_per_char: Duration::from_millis(50),
            navigate: Duration::from_millis(2000),
            post_action: Duration::from_millis(1500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: AgentConfig,
    }

    #[test]
    fn typing_delay_scales_with_length() {
        let delays = SettleDelays::default();
        assert_eq!(delays.after_typing(""), Duration::from_millis(500));
        assert_eq!(delays.after_typing("héllo"), Duration::from_millis(750));
        assert_eq!(SettleDelays::NONE.after_typing("abc"), Duration::ZERO);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "agent",
            "--model",
            "gemini-1.5-pro",
            "--max-steps",
            "5",
            "--api-key",
            "k",
            "--headless",
        ]);
        let gemini = cli.config.gemini();
        assert_eq!(gemini.model, "gemini-1.5-pro");
        assert_eq!(gemini.api_key.as_deref(), Some("k"));
        assert_eq!(cli.config.max_steps, 5);
        assert!(cli.config.headless);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let cli = Cli::parse_from(["agent", "--api-key", "  "]);
        assert!(cli.config.gemini().api_key.is_none());
    }
}
