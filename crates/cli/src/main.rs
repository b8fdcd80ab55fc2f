use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use server::{AppConfig, RuntimeDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "agentbrain")]
#[command(about = "Local-first retrieval service for documentation and source code")]
struct Cli {
  /// Config file path (default: ./agentbrain.yaml when present)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the HTTP server and background indexing worker
  Serve {
    /// Stay attached to the terminal and log to stderr
    #[arg(long)]
    foreground: bool,
    #[arg(long)]
    port: Option<u16>,
  },
  /// Enqueue an indexing job on a running server
  Index {
    /// Folder to index
    folder: PathBuf,
    /// Skip code files
    #[arg(long)]
    docs_only: bool,
    /// Authorize a reset when the embedding configuration changed
    #[arg(long)]
    force: bool,
    /// Allow a folder outside the project root
    #[arg(long)]
    allow_external: bool,
  },
  /// Query a running server
  Search {
    query: String,
    /// keyword, vector, hybrid, graph or multi
    #[arg(short, long, default_value = "hybrid")]
    mode: String,
    #[arg(short = 'k', long, default_value = "10")]
    top_k: usize,
    /// Output the raw JSON response
    #[arg(long)]
    json: bool,
  },
  /// Print the runtime descriptor of a running server, if any
  Status,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

  match cli.command {
    Commands::Serve { foreground, port } => {
      config.foreground = foreground;
      if let Some(port) = port {
        config.port = port;
      }

      let _guard = init_logging(&config, foreground);

      let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
      runtime.block_on(serve(config))
    }
    Commands::Index {
      folder,
      docs_only,
      force,
      allow_external,
    } => {
      let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
      runtime.block_on(enqueue_index(&config, folder, docs_only, force, allow_external))
    }
    Commands::Search {
      query,
      mode,
      top_k,
      json,
    } => {
      let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
      runtime.block_on(run_search(&config, query, mode, top_k, json))
    }
    Commands::Status => {
      let state = brain_core::StateDir::new(&config.state_dir);
      match RuntimeDescriptor::read(&state).context("reading runtime descriptor")? {
        Some(descriptor) => {
          println!("{}", serde_json::to_string_pretty(&descriptor)?);
          Ok(())
        }
        None => {
          println!("not running");
          Ok(())
        }
      }
    }
  }
}

async fn serve(config: AppConfig) -> Result<()> {
  let shutdown = CancellationToken::new();

  let signal_token = shutdown.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Interrupt received, shutting down");
      signal_token.cancel();
    }
  });

  server::serve(config, shutdown).await.context("server exited with error")
}

/// Base URL of the running server from the runtime descriptor
fn base_url(config: &AppConfig) -> Result<String> {
  let state = brain_core::StateDir::new(&config.state_dir);
  match RuntimeDescriptor::read(&state)? {
    Some(descriptor) => Ok(descriptor.base_url),
    None => bail!("no running server found; start one with `agentbrain serve`"),
  }
}

async fn enqueue_index(
  config: &AppConfig,
  folder: PathBuf,
  docs_only: bool,
  force: bool,
  allow_external: bool,
) -> Result<()> {
  let url = base_url(config)?;
  let folder = folder.canonicalize().with_context(|| format!("resolving {}", folder.display()))?;

  let body = serde_json::json!({
    "folder": folder,
    "options": { "include_code": !docs_only, "force": force },
    "allow_external": allow_external,
  });

  let response = reqwest::Client::new()
    .post(format!("{}/index", url))
    .json(&body)
    .send()
    .await
    .context("sending index request")?;

  let status = response.status();
  let body: serde_json::Value = response.json().await.context("reading response")?;
  if !status.is_success() {
    bail!("index request failed ({}): {}", status, body);
  }

  println!("{}", serde_json::to_string_pretty(&body)?);
  Ok(())
}

async fn run_search(config: &AppConfig, query: String, mode: String, top_k: usize, json: bool) -> Result<()> {
  let url = base_url(config)?;

  let body = serde_json::json!({ "query": query, "mode": mode, "top_k": top_k });
  let response = reqwest::Client::new()
    .post(format!("{}/search", url))
    .json(&body)
    .send()
    .await
    .context("sending search request")?;

  let status = response.status();
  let body: serde_json::Value = response.json().await.context("reading response")?;
  if !status.is_success() {
    bail!("search failed ({}): {}", status, body);
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&body)?);
    return Ok(());
  }

  let empty = Vec::new();
  let results = body.get("results").and_then(|r| r.as_array()).unwrap_or(&empty);
  if results.is_empty() {
    println!("no results");
    return Ok(());
  }

  for (i, result) in results.iter().enumerate() {
    let score = result.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
    let source = result
      .pointer("/metadata/source")
      .and_then(|s| s.as_str())
      .unwrap_or("<unknown>");
    let symbol = result.pointer("/metadata/symbol_name").and_then(|s| s.as_str());

    match symbol {
      Some(symbol) => println!("{:2}. [{:.3}] {} :: {}", i + 1, score, source, symbol),
      None => println!("{:2}. [{:.3}] {}", i + 1, score, source),
    }

    if let Some(text) = result.get("text").and_then(|t| t.as_str()) {
      let preview: String = text.lines().take(2).collect::<Vec<_>>().join(" | ");
      let preview: String = preview.chars().take(120).collect();
      println!("      {}", preview);
    }
  }

  Ok(())
}

/// Console logging in the foreground; console plus daily-rotated file logs
/// otherwise. The returned guard must stay alive for the process lifetime.
fn init_logging(config: &AppConfig, foreground: bool) -> Option<WorkerGuard> {
  let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

  if foreground {
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let log_dir = config.state_dir.join("logs");
  if std::fs::create_dir_all(&log_dir).is_err() {
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(&log_dir, "agentbrain.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let console_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(true);
  let file_layer = tracing_subscriber::fmt::layer()
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer);

  tracing_subscriber::registry()
    .with(env_filter)
    .with(console_layer)
    .with(file_layer)
    .init();

  Some(guard)
}
