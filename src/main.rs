use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quorum_core::config::{AppConfig, ModelConfig};
use quorum_core::event::EventBus;
use quorum_core::traits::LlmClient;
use quorum_core::types::{SessionId, WorkflowEvent};

use quorum_agent::{SessionManager, WorkflowEngine};

#[derive(Parser)]
#[command(name = "quorum", version, about = "Multi-agent workflow runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "quorum.toml")]
    config: PathBuf,

    /// Session ID (auto-generated if not provided)
    #[arg(short, long)]
    session: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive chat loop
    Repl,
    /// Run one request through the workflow and exit
    Run {
        /// The request to send
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Run a single agent of the given kind, outside the workflow
    Agent {
        /// Agent kind (search, analysis, summary, or a configured kind)
        kind: String,
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// List local agent kinds and remote agents
    Agents,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "quorum=debug,warn" } else { "quorum=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli.config)?;

    if let Some(Commands::Config) = &cli.command {
        println!("{}", toml::to_string_pretty(&redacted(&config))?);
        return Ok(());
    }

    let llm: Arc<dyn LlmClient> = quorum_llm::create_client(&config.model)?;
    let event_bus = Arc::new(EventBus::default());
    let engine = WorkflowEngine::builder(&config, llm)
        .event_bus(Arc::clone(&event_bus))
        .build()?;

    let session_id = cli
        .session
        .as_deref()
        .map(SessionId::from)
        .unwrap_or_default();

    match cli.command {
        Some(Commands::Run { prompt }) => {
            let request = prompt.join(" ");
            if request.trim().is_empty() {
                anyhow::bail!("nothing to run: pass a request after `run`");
            }
            spawn_event_printer(&event_bus);
            let reply = engine.execute_workflow(&request, &session_id, &[]).await;
            println!("{}", reply);
        }
        Some(Commands::Agent { kind, prompt }) => {
            let request = prompt.join(" ");
            let agent = Arc::new(engine.factory().create(&kind, &session_id)?);
            agent.initialize()?;
            spawn_event_printer(&event_bus);
            let outcome = agent.run(&request).await;
            engine.registry().unregister(agent.id());
            println!("{}", outcome?);
        }
        Some(Commands::Agents) => print_agents(&engine),
        Some(Commands::Config) => {}
        Some(Commands::Repl) | None => {
            spawn_event_printer(&event_bus);
            run_repl(&engine, &session_id, &config).await?;
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".quorum").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    eprintln!("Warning: no config file found. Set OPENAI_API_KEY or create quorum.toml");
    Ok(create_env_config())
}

/// Minimal config from the environment: OpenAI when a key is set, a local
/// Ollama endpoint otherwise.
fn create_env_config() -> AppConfig {
    let mut model = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => {
            let mut model = ModelConfig::new("gpt-4o");
            model.api_key = Some(key);
            model
        }
        Err(_) => {
            let mut model = ModelConfig::new("llama3.2");
            model.provider = "ollama".to_string();
            model.base_url = Some("http://localhost:11434/v1/chat/completions".to_string());
            model
        }
    };
    model.max_tokens = 8192;
    AppConfig::with_model(model)
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.model.api_key.is_some() {
        config.model.api_key = Some("***".to_string());
    }
    if let Some(search) = config.web_search.as_mut() {
        search.api_key = "***".to_string();
    }
    config
}

fn spawn_event_printer(event_bus: &Arc<EventBus>) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                WorkflowEvent::NodeCompleted { node, iteration, .. } => {
                    eprintln!("[{}] {}", iteration, node);
                }
                WorkflowEvent::ToolExecuted {
                    agent_id,
                    tool,
                    is_error,
                } => {
                    let status = if is_error { "ERROR" } else { "ok" };
                    eprintln!("  [{} -> {}: {}]", agent_id, tool, status);
                }
                WorkflowEvent::ForcedTermination { iterations, .. } => {
                    eprintln!("[stopped after {} iterations]", iterations);
                }
                WorkflowEvent::RunError { error, .. } => {
                    eprintln!("[error] {}", error);
                }
                WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunCompleted { .. } => {}
            }
        }
    });
}

fn print_agents(engine: &WorkflowEngine) {
    println!("Local agents:");
    for kind in engine.factory().kinds() {
        if let Some(profile) = engine.factory().profile(kind) {
            println!("  {:<10} {} [{}]", kind, profile.description, profile.tools.join(", "));
        }
    }

    let remote = engine.a2a_registry().all_ids();
    if remote.is_empty() {
        println!("Remote agents: none configured");
        return;
    }
    println!("Remote agents:");
    for id in remote {
        match engine.a2a_registry().capabilities(&id) {
            Ok(caps) => {
                let skills: Vec<&str> = caps.skills.iter().map(|s| s.id.as_str()).collect();
                println!("  {:<10} {} [{}]", id, caps.description, skills.join(", "));
            }
            Err(e) => warn!(agent_id = %id, error = %e, "Remote agent vanished while listing"),
        }
    }
}

async fn run_repl(engine: &WorkflowEngine, session_id: &SessionId, config: &AppConfig) -> anyhow::Result<()> {
    let sessions = SessionManager::new();
    let session_id = sessions.get_or_create(session_id);

    println!("Quorum v{}", env!("CARGO_PKG_VERSION"));
    println!("Session: {}", session_id);
    println!("Model: {} ({})", config.model.model_id, config.model.provider);
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("/history  show this session's conversation");
                println!("/session  show session details");
                println!("/clear    forget this session's history");
                println!("/agents   list available agents");
                println!("/quit     exit");
                continue;
            }
            "/history" => {
                for message in sessions.history(&session_id) {
                    println!("{}: {}", message.role(), message.content());
                }
                continue;
            }
            "/session" => {
                println!("{}", sessions.summary(&session_id));
                continue;
            }
            "/clear" => {
                sessions.clear(&session_id);
                engine.cleanup_session(&session_id);
                println!("Session cleared.");
                continue;
            }
            "/agents" => {
                print_agents(engine);
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {} (try /help)", cmd);
                continue;
            }
            _ => {}
        }

        let history = sessions.history(&session_id);
        let reply = engine.execute_workflow(input, &session_id, &history).await;
        sessions.add_user_message(&session_id, input);
        sessions.add_system_response(&session_id, reply.clone());
        println!("\n{}\n", reply);
    }

    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
