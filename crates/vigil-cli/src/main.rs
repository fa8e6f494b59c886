//! vigil - browser security-analysis agent, demo driver
//!
//! Seeds the network cache from a capture file, runs one conversation
//! against the configured model endpoint, and prints chunks as they arrive.
//! There is no page attached, so script executions are rejected by a stub
//! runner instead of evaluated.

mod config;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use vigil_agent::{tools, Orchestrator, OrchestratorConfig, StreamChunk, ToolRegistry};
use vigil_ai::{ModelClient, ModelConfig};
use vigil_exec::ScriptQueue;
use vigil_net::{NetworkCache, NetworkEntry};

/// vigil - security analysis of captured page traffic
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The question to investigate
    prompt: Option<String>,

    /// Target id the capture belongs to
    #[arg(short, long, default_value = "tab-1")]
    target: String,

    /// JSON file with an array of captured network entries
    #[arg(short, long)]
    capture: Option<String>,

    /// Model id (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Model endpoint base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("vigil=debug")
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let Some(prompt) = args.prompt.clone() else {
        eprintln!("Usage: vigil [OPTIONS] <PROMPT>");
        std::process::exit(2);
    };

    let cfg = config::Config::load();
    let api_key = cfg.get_api_key().unwrap_or_else(|| {
        eprintln!("No API key found. Set ANTHROPIC_API_KEY or add api_key to the config file.");
        std::process::exit(1);
    });
    let base_url = args.base_url.clone().unwrap_or_else(|| cfg.get_base_url());
    let model = args
        .model
        .clone()
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());

    let cache = Arc::new(NetworkCache::new());
    if let Some(path) = &args.capture {
        let count = seed_cache(&cache, &args.target, path)?;
        println!("Loaded {count} captured requests from {path}");
    }

    let queue = Arc::new(ScriptQueue::new());
    spawn_stub_runner(queue.clone(), args.target.clone());

    let client = Arc::new(ModelClient::new(ModelConfig::new(base_url, api_key, model)));
    let registry: Arc<ToolRegistry> = Arc::new(tools::default_registry(cache, queue));
    let mut orch_config = OrchestratorConfig::default();
    if let Some(max) = cfg.max_history_messages {
        orch_config.max_history_messages = max;
    }
    if let Some(max) = cfg.max_turns {
        orch_config.max_turns = max;
    }
    let orchestrator = Orchestrator::new(client, registry, orch_config);

    orchestrator.start("cli", &prompt, &args.target);
    run_to_completion(&orchestrator).await;
    Ok(())
}

/// Poll the conversation and print chunks until it reaches a terminal state
async fn run_to_completion(orchestrator: &Orchestrator) {
    use std::io::Write;

    loop {
        let Some(update) = orchestrator.poll("cli") else {
            return;
        };
        for chunk in update.chunks {
            match chunk {
                StreamChunk::TextDelta { text } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                StreamChunk::ToolCall { name, args, .. } => {
                    println!("\n[tool] {name} {args}");
                }
                StreamChunk::ToolResult { name, result, .. } => {
                    println!("[tool] {name} -> {result}");
                }
                StreamChunk::Error { message } => {
                    eprintln!("\n[error] {message}");
                }
                StreamChunk::Finish => println!(),
            }
        }
        if update.status.is_terminal() {
            println!("[{:?}]", update.status);
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Load captured entries from a JSON file into the cache
fn seed_cache(cache: &NetworkCache, target: &str, path: &str) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<NetworkEntry> = serde_json::from_str(&content)?;
    let count = entries.len();
    for entry in entries {
        cache.record(target, entry);
    }
    Ok(count)
}

/// Without a page attached there is nothing to evaluate scripts in; reject
/// dequeued work so the model learns the page is unavailable instead of
/// waiting out the timeout.
fn spawn_stub_runner(queue: Arc<ScriptQueue>, target: String) {
    tokio::spawn(async move {
        loop {
            while let Some(script) = queue.dequeue(&target) {
                queue.reject(&script.id, "No page attached: script execution is unavailable in CLI mode");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });
}
