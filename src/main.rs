use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flowlab_config::FlowDefinition;
use flowlab_provider::{EchoProvider, OpenAiConfig, OpenAiProvider, TemplateLibrary};
use flowlab_store::{MemoryStore, SqliteStore, Store};
use flowlab_task_runtime::{ExecutorRegistry, Inputs, ModelProvider};
use flowlab_workflow_orchestrator::{
  ExecutionEvent, FlowOptions, FlowOrchestrator, FnNotifier, ProgressEvent,
};

/// flowlab - run prompt flows as DAGs
#[derive(Parser)]
#[command(name = "flowlab")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.flowlab)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Keep executions in memory instead of the SQLite database
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a flow file without running it
  Validate {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,
  },

  /// Run a flow file. Input variables are read as a JSON object from stdin
  /// and merged with --input pairs.
  Run {
    /// Path to the flow definition (JSON)
    flow_file: PathBuf,

    /// Input variable as key=value; the value is parsed as JSON when possible
    #[arg(long = "input", short = 'i', value_parser = parse_input)]
    inputs: Vec<(String, Value)>,

    #[command(flatten)]
    provider: ProviderArgs,

    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long)]
    node_timeout_ms: Option<u64>,

    /// Deadline for the whole flow
    #[arg(long)]
    timeout_ms: Option<u64>,
  },

  /// Show a stored execution with its node records
  Status { execution_id: String },

  /// List stored executions of a flow, newest first
  History { flow_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
  /// Offline provider that returns the rendered prompt
  Echo,
  /// OpenAI-compatible chat completions endpoint
  Openai,
}

#[derive(clap::Args)]
struct ProviderArgs {
  #[arg(long, value_enum, default_value = "echo")]
  provider: ProviderKind,

  /// Default model for prompt nodes
  #[arg(long)]
  model: Option<String>,

  #[arg(long)]
  base_url: Option<String>,

  #[arg(long, env = "FLOWLAB_API_KEY", hide_env_values = true)]
  api_key: Option<String>,

  /// Directory of prompt templates, one `<id>[@<version>].<ext>` file each
  #[arg(long)]
  templates: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowlab=info,warn")),
    )
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".flowlab"),
  };

  let Some(command) = cli.command else {
    println!("flowlab - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Validate { flow_file } => validate(&flow_file),
      Commands::Run {
        flow_file,
        inputs,
        provider,
        max_concurrency,
        node_timeout_ms,
        timeout_ms,
      } => {
        let store = open_store(&data_dir, cli.ephemeral).await?;
        let mut options = FlowOptions::new();
        options.max_concurrency = max_concurrency;
        options.node_timeout_ms = node_timeout_ms;
        options.timeout_ms = timeout_ms;
        run(&flow_file, inputs, &provider, options, store).await
      }
      Commands::Status { execution_id } => {
        let store = open_store(&data_dir, cli.ephemeral).await?;
        let orchestrator = FlowOrchestrator::new(ExecutorRegistry::new(), store);
        let details = orchestrator
          .get_execution(&execution_id)
          .await
          .with_context(|| format!("failed to load execution '{}'", execution_id))?;
        println!("{}", serde_json::to_string_pretty(&details)?);
        Ok(())
      }
      Commands::History { flow_id } => {
        let store = open_store(&data_dir, cli.ephemeral).await?;
        let executions = store
          .list_flow_executions(&flow_id)
          .await
          .with_context(|| format!("failed to list executions of '{}'", flow_id))?;
        for execution in executions {
          println!(
            "{}  {:<9}  {}  {}ms",
            execution.execution_id,
            format!("{:?}", execution.status).to_lowercase(),
            execution.started_at.to_rfc3339(),
            execution.duration_ms.unwrap_or(0),
          );
        }
        Ok(())
      }
    }
  })
}

fn validate(flow_file: &Path) -> Result<()> {
  let flow = read_flow(flow_file)?;
  let orchestrator = FlowOrchestrator::new(
    ExecutorRegistry::with_builtins(Arc::new(EchoProvider::new())),
    Arc::new(MemoryStore::new()),
  );
  let report = orchestrator.validate(&flow);
  println!("{}", serde_json::to_string_pretty(&report)?);

  if !report.is_valid {
    bail!("flow '{}' is invalid: {}", flow.flow_id, report.summary());
  }
  eprintln!(
    "flow '{}' is valid ({} nodes, {} edges, {} warnings)",
    flow.flow_id,
    flow.nodes.len(),
    flow.edges.len(),
    report.warnings.len()
  );
  Ok(())
}

async fn run(
  flow_file: &Path,
  pairs: Vec<(String, Value)>,
  provider: &ProviderArgs,
  options: FlowOptions,
  store: Arc<dyn Store>,
) -> Result<()> {
  let flow = read_flow(flow_file)?;
  eprintln!("Loaded flow: {}", flow.name);

  let mut inputs = read_payload_from_stdin()?;
  inputs.extend(pairs);

  let registry = ExecutorRegistry::with_builtins(build_provider(provider)?);
  let orchestrator = FlowOrchestrator::new(registry, store.clone());

  store
    .save_flow_definition(&flow)
    .await
    .context("failed to store flow definition")?;

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("interrupted, cancelling flow");
      interrupt.cancel();
    }
  });

  let notifier = Arc::new(FnNotifier::new(print_progress));
  let result = orchestrator
    .execute_definition(flow, inputs, options, notifier, cancel)
    .await
    .context("flow execution failed")?;

  eprintln!(
    "Execution {}: {} tokens, cost {:.4}, {}ms",
    result.execution_id, result.total_tokens, result.total_cost, result.duration_ms
  );
  println!("{}", serde_json::to_string_pretty(&result)?);

  if !result.success {
    bail!(
      "flow {}: {}",
      format!("{:?}", result.status).to_lowercase(),
      result.error.unwrap_or_default()
    );
  }
  Ok(())
}

fn build_provider(args: &ProviderArgs) -> Result<Arc<dyn ModelProvider>> {
  let library = match &args.templates {
    Some(dir) => TemplateLibrary::load_dir(dir)
      .with_context(|| format!("failed to load templates from {}", dir.display()))?,
    None => TemplateLibrary::new(),
  };

  let provider: Arc<dyn ModelProvider> = match args.provider {
    ProviderKind::Echo => Arc::new(EchoProvider::new().with_templates(library)),
    ProviderKind::Openai => {
      let mut config = OpenAiConfig {
        api_key: args.api_key.clone(),
        ..OpenAiConfig::default()
      };
      if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
      }
      if let Some(model) = &args.model {
        config.default_model = model.clone();
      }
      let provider = OpenAiProvider::new(config).context("failed to create model provider")?;
      Arc::new(provider.with_templates(library))
    }
  };
  Ok(provider)
}

async fn open_store(data_dir: &Path, ephemeral: bool) -> Result<Arc<dyn Store>> {
  if ephemeral {
    return Ok(Arc::new(MemoryStore::new()));
  }
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
  let path = data_dir.join("flowlab.db");
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open database {}", path.display()))?;
  Ok(Arc::new(store))
}

fn read_flow(flow_file: &Path) -> Result<FlowDefinition> {
  let content = std::fs::read_to_string(flow_file)
    .with_context(|| format!("failed to read flow file: {}", flow_file.display()))?;
  FlowDefinition::from_json(&content)
    .with_context(|| format!("failed to parse flow file: {}", flow_file.display()))
}

fn print_progress(event: ProgressEvent) {
  let line = match &event.event {
    ExecutionEvent::FlowStarted { flow_id, node_count } => {
      format!("flow '{}' started with {} nodes", flow_id, node_count)
    }
    ExecutionEvent::NodeStarted { node_id, attempt } if *attempt > 1 => {
      format!("{} started (attempt {})", node_id, attempt)
    }
    ExecutionEvent::NodeStarted { node_id, .. } => format!("{} started", node_id),
    ExecutionEvent::NodeRetrying { node_id, error, .. } => {
      format!("{} failed, retrying: {}", node_id, error)
    }
    ExecutionEvent::NodeCompleted { node_id, .. } => format!("{} completed", node_id),
    ExecutionEvent::NodeFailed { node_id, error, .. } => format!("{} failed: {}", node_id, error),
    ExecutionEvent::NodeSkipped { node_id } => format!("{} skipped", node_id),
    ExecutionEvent::FlowCompleted { .. } => "flow completed".to_string(),
    ExecutionEvent::FlowFailed { error } => format!("flow failed: {}", error),
    ExecutionEvent::FlowCancelled => "flow cancelled".to_string(),
    ExecutionEvent::NodeScheduled { .. } => return,
  };
  eprintln!("[{:>3}%] {}", event.percent_complete, line);
}

fn parse_input(raw: &str) -> Result<(String, Value), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

fn read_payload_from_stdin() -> Result<Inputs> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Inputs::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;
  if input.trim().is_empty() {
    return Ok(Inputs::new());
  }

  match serde_json::from_str(&input).context("failed to parse payload JSON from stdin")? {
    Value::Object(map) => Ok(map),
    _ => bail!("stdin payload must be a JSON object"),
  }
}
