use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use tars_agent::{AgentStep, ProgressSink};

const PORTS: std::ops::Range<u16> = 3000..3010;

/// Events streamed to the browser via SSE.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentEvent {
    Started {
        task: String,
    },
    Step {
        number: usize,
        action: String,
        thought: Option<String>,
        reason: Option<String>,
        url: String,
    },
    TaskComplete {
        result: String,
    },
    TaskError {
        message: String,
    },
    Ready {},
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Started { .. } => "started",
            AgentEvent::Step { .. } => "step",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready {} => "ready",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

impl From<&AgentStep> for AgentEvent {
    fn from(step: &AgentStep) -> Self {
        AgentEvent::Step {
            number: step.step_number,
            action: step.action.command.to_string(),
            thought: step.action.thought.clone(),
            reason: step.action.reason.clone(),
            url: step.observation.url.clone(),
        }
    }
}

/// Forwards every finished step to SSE subscribers.
pub struct EventProgress(pub broadcast::Sender<AgentEvent>);

impl ProgressSink for EventProgress {
    fn on_step(&mut self, step: &AgentStep) {
        // No subscribers is fine; the UI may not be open.
        let _ = self.0.send(AgentEvent::from(step));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<AgentEvent>,
    /// Set when a command is accepted, cleared by [`Commands::finished`].
    pub busy: Arc<AtomicBool>,
}

/// Consumer side of the command channel. At most one command is in flight:
/// the web handler refuses new ones until the current run calls `finished`.
pub struct Commands {
    rx: mpsc::Receiver<String>,
    busy: Arc<AtomicBool>,
}

impl Commands {
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn finished(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

fn channels() -> (Arc<AppState>, Commands) {
    let (cmd_tx, rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
    let busy = Arc::new(AtomicBool::new(false));
    let state = Arc::new(AppState {
        cmd_tx,
        event_tx,
        busy: busy.clone(),
    });
    (state, Commands { rx, busy })
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Start the web UI on the first free port in 3000-3009 and return the
/// command consumer plus the event sender.
pub async fn start_server() -> Result<(Commands, broadcast::Sender<AgentEvent>)> {
    let (state, commands) = channels();
    let event_tx = state.event_tx.clone();
    let app = router(state);

    let mut bound = None;
    for port in PORTS {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(l) => {
                bound = Some((l, port));
                break;
            }
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound
        .context("could not bind to any port 3000-3009; is another agent still running?")?;

    info!("web UI running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "web server stopped");
        }
    });

    Ok((commands, event_tx))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return (StatusCode::BAD_REQUEST, "command is empty");
    }
    if state
        .busy
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        warn!(%command, "command rejected, agent is busy");
        return (StatusCode::CONFLICT, "agent is busy");
    }
    info!(%command, "command accepted");
    match state.cmd_tx.try_send(command) {
        Ok(()) => (StatusCode::ACCEPTED, "ok"),
        Err(e) => {
            state.busy.store(false, Ordering::Release);
            match e {
                TrySendError::Full(_) => (StatusCode::CONFLICT, "agent is busy"),
                TrySendError::Closed(_) => (StatusCode::SERVICE_UNAVAILABLE, "agent stopped"),
            }
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>TARS Browser Agent</title>
<style>
  body { margin: 0; height: 100vh; display: flex; flex-direction: column;
         background: #0d1117; color: #d0d7de; font: 14px/1.5 system-ui, sans-serif; }
  header { padding: 16px 24px; border-bottom: 1px solid #21262d; display: flex; gap: 10px; align-items: center; }
  header h1 { margin: 0; font-size: 18px; color: #fff; }
  #state { font-size: 12px; padding: 2px 8px; border-radius: 10px; background: #1f6f43; }
  #state.busy { background: #9a6700; }
  main { flex: 1; display: flex; flex-direction: column; gap: 12px; width: 100%;
         max-width: 820px; margin: 0 auto; padding: 16px 24px; box-sizing: border-box; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  #log > div { padding: 8px 12px; border-radius: 6px; border-left: 3px solid #30363d; background: #161b22; }
  .task { border-left-color: #8250df !important; }
  .started { color: #8b949e; }
  .step { font-family: ui-monospace, monospace; font-size: 13px; border-left-color: #388bfd !important; }
  .step b { color: #a371f7; margin-right: 8px; }
  .step .thought, .step .url { font-family: system-ui, sans-serif; color: #8b949e; font-size: 12px; }
  .task_complete { border-left-color: #2ea043 !important; color: #7ee787; }
  .task_error, .rejected { border-left-color: #f85149 !important; color: #ffa198; }
  form { display: flex; gap: 8px; }
  #cmd { flex: 1; padding: 10px 12px; border-radius: 6px; border: 1px solid #30363d;
         background: #010409; color: #fff; font-size: 15px; }
  button { padding: 10px 20px; border: 0; border-radius: 6px; background: #238636; color: #fff; font-weight: 600; }
  :disabled { opacity: 0.5; }
</style>
</head>
<body>
  <header><h1>TARS Browser Agent</h1><span id="state">idle</span></header>
  <main>
    <div id="log"></div>
    <form id="form">
      <input id="cmd" placeholder="Describe a task, e.g. find the Gemini API pricing page" autofocus>
      <button id="send">Run</button>
    </form>
  </main>
<script>
  const $ = id => document.getElementById(id);
  const esc = s => String(s ?? '').replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function add(kind, html) {
    const div = document.createElement('div');
    div.className = kind;
    div.innerHTML = html;
    $('log').appendChild(div);
    $('log').scrollTop = $('log').scrollHeight;
  }

  function setBusy(busy) {
    $('cmd').disabled = $('send').disabled = busy;
    $('state').textContent = busy ? 'running' : 'idle';
    $('state').className = busy ? 'busy' : '';
    if (!busy) $('cmd').focus();
  }

  $('form').addEventListener('submit', async e => {
    e.preventDefault();
    const command = $('cmd').value.trim();
    if (!command) return;
    $('cmd').value = '';
    add('task', esc(command));
    setBusy(true);
    const res = await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command}),
    });
    if (!res.ok) {
      add('rejected', 'Rejected: ' + esc(await res.text()));
      setBusy(false);
    }
  });

  const render = {
    started: d => 'Working on: ' + esc(d.task),
    step: d => '<b>' + d.number + '</b>' + esc(d.action)
      + (d.thought ? '<div class="thought">' + esc(d.thought) + '</div>' : '')
      + (d.url ? '<div class="url">' + esc(d.url) + '</div>' : ''),
    task_complete: d => 'Result: ' + esc(d.result),
    task_error: d => 'Failed: ' + esc(d.message),
  };

  const events = new EventSource('/events');
  for (const [kind, view] of Object.entries(render)) {
    events.addEventListener(kind, e => add(kind, view(JSON.parse(e.data))));
  }
  events.addEventListener('ready', () => setBusy(false));
</script>
</body>
</html>
"##;
