mod face;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use face::{AgentEvent, EventProgress};
use tars_agent::context::{
    PageContext, build_text_prompt, build_vision_prompt, enhanced_page_context,
};
use tars_agent::{
    AgentConfig, AgentStep, BrowserAgent, BrowserSession, ChromeExecutor, ChromeObserver,
    GeminiBrain, GeminiClient, SettleDelays,
};

#[derive(Parser)]
#[command(name = "agent", version, about = "Gemini-driven browser agent")]
struct Cli {
    #[command(flatten)]
    config: AgentConfig,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Web UI on localhost; each submitted command runs as one task (default).
    Serve {
        /// Keep using the current tab instead of opening one per task.
        #[arg(long)]
        same_tab: bool,
    },
    /// Run a single task and print its result.
    Run { task: String },
    /// Ask one question about the current page.
    Ask {
        prompt: String,
        /// Always attach a screenshot.
        #[arg(long)]
        force_vision: bool,
        /// Skip visual content detection and use text mode unless forced.
        #[arg(long)]
        no_detect: bool,
        #[arg(long, default_value = "English")]
        language: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.config.gemini().api_key.is_none() {
        bail!("GEMINI_API_KEY is not set (flag, environment or .env)");
    }

    match cli.mode.unwrap_or(Mode::Serve { same_tab: false }) {
        Mode::Serve { same_tab } => serve(&cli.config, same_tab).await,
        Mode::Run { task } => run(&cli.config, &task).await,
        Mode::Ask {
            prompt,
            force_vision,
            no_detect,
            language,
        } => ask(&cli.config, &prompt, force_vision, !no_detect, &language).await,
    }
}

async fn launch(config: &AgentConfig) -> Result<Arc<BrowserSession>> {
    let config = config.clone();
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&config))
        .await
        .context("browser launch panicked")??;
    Ok(Arc::new(session))
}

fn build_agent(session: &Arc<BrowserSession>, config: &AgentConfig) -> Result<BrowserAgent> {
    let delays = SettleDelays::default();
    let client = GeminiClient::new(config.gemini())?;
    let agent = BrowserAgent::new(
        Arc::new(ChromeObserver::new(session.clone())),
        Arc::new(GeminiBrain::new(client)),
        Arc::new(ChromeExecutor::new(session.clone(), delays)),
    )
    .with_settle_delay(delays.post_action);
    Ok(agent)
}

async fn serve(config: &AgentConfig, same_tab: bool) -> Result<()> {
    // UI first so the user sees something while Chrome starts.
    let (mut commands, event_tx) = face::start_server().await?;

    let session = launch(config).await?;
    let agent = build_agent(&session, config)?;
    info!("waiting for commands");

    // Single consumer: runs never overlap on the shared page.
    while let Some(command) = commands.next().await {
        if !same_tab {
            let session = session.clone();
            match tokio::task::spawn_blocking(move || session.new_tab()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "could not open a tab for the task"),
                Err(e) => warn!(error = %e, "tab task panicked"),
            }
        }
        run_command(&agent, &command, config.max_steps, &event_tx).await;
        // Clear before announcing, so the UI never sees ready while busy.
        commands.finished();
        let _ = event_tx.send(AgentEvent::Ready {});
    }

    Ok(())
}

async fn run_command(
    agent: &BrowserAgent,
    command: &str,
    max_steps: usize,
    events: &broadcast::Sender<AgentEvent>,
) {
    let _ = events.send(AgentEvent::Started {
        task: command.to_string(),
    });

    let mut progress = EventProgress(events.clone());
    let event = match agent.run(command, max_steps, &mut progress).await {
        Ok(result) => AgentEvent::TaskComplete { result },
        Err(e) => AgentEvent::TaskError {
            message: e.to_string(),
        },
    };
    let _ = events.send(event);
}

async fn run(config: &AgentConfig, task: &str) -> Result<()> {
    let session = launch(config).await?;
    let agent = build_agent(&session, config)?;

    let mut print_step = |step: &AgentStep| {
        println!("[{}] {}", step.step_number, step.action.command);
        if let Some(thought) = &step.action.thought {
            println!("    {thought}");
        }
    };
    let result = agent.run(task, config.max_steps, &mut print_step).await?;
    println!("{result}");
    Ok(())
}

async fn ask(
    config: &AgentConfig,
    prompt: &str,
    force_vision: bool,
    smart_detection: bool,
    language: &str,
) -> Result<()> {
    let session = launch(config).await?;
    let observer = ChromeObserver::new(session.clone());
    let client = GeminiClient::new(config.gemini())?;

    let context = enhanced_page_context(session, &observer, force_vision, smart_detection).await?;
    info!(url = context.url(), vision = context.has_visual_data(), "page context ready");

    let reply = match &context {
        PageContext::Vision { observation } => {
            let prompt = build_vision_prompt(prompt, &context, language);
            client.generate_text(&prompt, Some(&observation.screenshot)).await?
        }
        PageContext::Text { .. } => {
            let prompt = build_text_prompt(prompt, &context, language);
            client.generate_text(&prompt, None).await?
        }
    };
    println!("{reply}");
    Ok(())
}
