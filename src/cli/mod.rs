pub mod config;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::engine::EngineClient;
use crate::engine::http::HttpEngineClient;
use crate::engine::types::{
    InstanceFilter, ProcessDefinition, ProcessInstance, ProcessStatus, RestoreRequest,
};
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::variables::schema::{find_variable, variable_schema};
use crate::variables::{RawVariables, serialize, validate_with_report};

use config::{Overrides, ProcflowConfig, Settings};

#[derive(Parser)]
#[command(
    name = "procflow",
    version,
    about = "Validate process variables and drive instance lifecycles on a process engine"
)]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to procflow.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the engine API
    #[arg(long, global = true, env = "PROCFLOW_ENGINE_URL")]
    engine_url: Option<String>,

    /// Bearer token sent with every engine request
    #[arg(long, global = true, env = "PROCFLOW_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List process definitions
    Definitions {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List process instances
    Instances {
        /// Only instances of this definition
        #[arg(short, long)]
        definition: Option<String>,

        /// Filter by status (running, completed, suspended, error)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        /// Page size (default: from config, then 10)
        #[arg(long)]
        page_size: Option<u32>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show aggregate instance statistics
    Stats {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Check variables against a definition's schema without starting anything
    Validate {
        /// Definition ID
        definition: String,

        /// Variable as name=value (repeatable)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Variables as a JSON object; --var entries override its keys
        #[arg(long)]
        vars_json: Option<String>,
    },

    /// Validate variables and start a new instance
    Start {
        /// Definition ID
        definition: String,

        /// Variable as name=value (repeatable)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Variables as a JSON object; --var entries override its keys
        #[arg(long)]
        vars_json: Option<String>,
    },

    /// Suspend a running instance
    Suspend {
        /// Instance ID
        instance: String,
    },

    /// Resume a suspended instance
    Resume {
        /// Instance ID
        instance: String,
    },

    /// Copy a definition under a new name
    Copy {
        /// Definition ID
        definition: String,
    },

    /// Delete a definition
    Delete {
        /// Definition ID
        definition: String,
    },

    /// Show a definition's version history
    Versions {
        /// Definition ID
        definition: String,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Make an earlier definition version current again
    Restore {
        /// Version ID
        version: String,

        /// Recorded as the author of the restore
        #[arg(long, env = "PROCFLOW_AUTHOR")]
        author: String,

        /// Commit message (default: "Restored version <number>")
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Show where an instance's execution tokens sit
    Tokens {
        /// Instance ID
        instance: String,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = parse_cli(std::env::args_os());

    let file_config = ProcflowConfig::load(cli.config.as_deref())?;
    let settings = file_config.resolve(Overrides {
        engine_url: cli.engine_url,
        api_token: cli.api_token,
        timeout_s: cli.timeout,
        page_size: None,
    });

    let client =
        HttpEngineClient::new(&settings.engine_url, settings.timeout, settings.api_token.clone())
            .context("Failed to create engine client")?;
    info!(engine_url = %client.base_url(), "Using process engine");
    let engine: Arc<dyn EngineClient> = Arc::new(client);

    match cli.command {
        Commands::Definitions { format } => cmd_definitions(engine, format).await,
        Commands::Instances {
            definition,
            status,
            page,
            page_size,
            format,
        } => cmd_instances(engine, &settings, definition, status, page, page_size, format).await,
        Commands::Stats { format } => cmd_stats(engine, format).await,
        Commands::Validate {
            definition,
            vars,
            vars_json,
        } => cmd_validate(engine, &definition, collect_vars(vars, vars_json)?).await,
        Commands::Start {
            definition,
            vars,
            vars_json,
        } => cmd_start(engine, &definition, collect_vars(vars, vars_json)?).await,
        Commands::Suspend { instance } => cmd_transition(engine, &instance, true).await,
        Commands::Resume { instance } => cmd_transition(engine, &instance, false).await,
        Commands::Copy { definition } => cmd_copy(engine, &definition).await,
        Commands::Delete { definition } => cmd_delete(engine, &definition).await,
        Commands::Versions { definition, format } => cmd_versions(engine, &definition, format).await,
        Commands::Restore {
            version,
            author,
            message,
        } => cmd_restore(engine, &version, RestoreRequest::new(author, message)).await,
        Commands::Tokens { instance, format } => cmd_tokens(engine, &instance, format).await,
    }
}

/// Parse arguments after loading `.env`, so env-backed flags see its values.
/// The `--dotenv` path comes from a first, lenient pass over the same args.
fn parse_cli<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let early = Cli::try_parse_from(&args).ok();
    load_dotenv(early.as_ref().and_then(|c| c.dotenv.as_deref()));
    Cli::parse_from(args)
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&std::path::Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Parse a `name=value` pair. The value is kept as text; the validator
/// coerces it to the declared type.
pub fn parse_var(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{}'", s));
    }
    Ok((name.to_string(), Value::String(value.to_string())))
}

/// Merge `--vars-json` and `--var` input into one raw variable map.
pub fn collect_vars(pairs: Vec<(String, Value)>, json: Option<String>) -> Result<RawVariables> {
    let mut raw = match json {
        Some(text) => serde_json::from_str::<RawVariables>(&text)
            .context("Failed to parse --vars-json (expected a JSON object)")?,
        None => RawVariables::new(),
    };
    raw.extend(pairs);
    Ok(raw)
}

async fn cmd_definitions(engine: Arc<dyn EngineClient>, format: OutputFormat) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    orchestrator.fetch_definitions().await;
    let state = orchestrator.definitions();
    if let Some(err) = state.error {
        anyhow::bail!("Failed to list definitions: {}", err);
    }

    if state.items.is_empty() {
        println!("No definitions found.");
        return Ok(());
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&state.items)?);
        return Ok(());
    }

    println!(
        "{:<38} {:<28} {:<8} {:<8} {:<8}",
        "DEFINITION ID", "NAME", "VERSION", "ACTIVE", "TOTAL"
    );
    println!("{}", "-".repeat(94));
    for def in &state.items {
        println!(
            "{:<38} {:<28} {:<8} {:<8} {:<8}",
            def.id, def.name, def.version, def.active_instances, def.total_instances
        );
    }

    println!("\nTotal: {} definition(s)", state.items.len());
    Ok(())
}

async fn cmd_instances(
    engine: Arc<dyn EngineClient>,
    settings: &Settings,
    definition: Option<String>,
    status: Option<String>,
    page: u32,
    page_size: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let status = status
        .as_deref()
        .map(str::parse::<ProcessStatus>)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let filter = InstanceFilter {
        definition_id: definition,
        status,
        page,
        page_size: page_size.unwrap_or(settings.page_size),
        ..InstanceFilter::default()
    };

    let orchestrator = Orchestrator::new(engine);
    orchestrator.fetch_instances(Some(filter)).await;
    let state = orchestrator.instances();
    if let Some(err) = state.error {
        anyhow::bail!("Failed to list instances: {}", err);
    }

    if format == OutputFormat::Json {
        let items: Vec<Value> = state.items.iter().map(instance_json).collect();
        let page = orchestrator.instance_page();
        let body = json!({
            "items": items,
            "total": page.map(|p| p.total),
            "page": page.map(|p| p.page),
            "totalPages": page.map(|p| p.total_pages),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if state.items.is_empty() {
        println!("No instances found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<10} {:<20}",
        "INSTANCE ID", "DEFINITION", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(94));
    for inst in &state.items {
        let started = inst
            .start_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<24} {:<10} {:<20}",
            inst.id, inst.definition_name, inst.status, started
        );
    }

    if let Some(page) = orchestrator.instance_page() {
        println!(
            "\nPage {} of {} ({} instance(s) total)",
            page.page,
            page.total_pages.max(1),
            page.total
        );
    }
    Ok(())
}

fn instance_json(inst: &ProcessInstance) -> Value {
    json!({
        "id": inst.id,
        "definition_id": inst.definition_id,
        "definition_name": inst.definition_name,
        "status": inst.status,
        "start_time": inst.start_time,
        "end_time": inst.end_time,
        "variables": serialize(&inst.variables),
    })
}

async fn cmd_stats(engine: Arc<dyn EngineClient>, format: OutputFormat) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    orchestrator.fetch_stats().await;
    let state = orchestrator.stats();
    if let Some(err) = state.error {
        anyhow::bail!("Failed to fetch stats: {}", err);
    }
    let Some(stats) = state.items.first() else {
        anyhow::bail!("Engine returned no statistics");
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("Total instances:  {}", stats.total_instances);
    println!("Active instances: {}", stats.active_instances);
    println!("Error rate:       {:.1}%", stats.error_rate);
    match stats.average_completion_time {
        Some(secs) => println!("Avg completion:   {:.1}s", secs),
        None => println!("Avg completion:   -"),
    }
    if !stats.status_counts.is_empty() {
        println!("\nBy status:");
        for (status, count) in &stats.status_counts {
            println!("  {:<10} {}", status, count);
        }
    }
    Ok(())
}

async fn cmd_validate(
    engine: Arc<dyn EngineClient>,
    definition_id: &str,
    raw: RawVariables,
) -> Result<()> {
    let definition = engine
        .get_definition(definition_id)
        .await
        .with_context(|| format!("Definition '{}' not found", definition_id))?;

    println!("Definition: {} (v{})", definition.name, definition.version);

    match validate_with_report(&raw, variable_schema(&definition)) {
        Ok(report) => {
            println!("Validation: OK");
            for var in &report.variables {
                let note = if report.defaulted.contains(&var.name) {
                    " (default)"
                } else {
                    ""
                };
                println!("  {} [{}] = {}{}", var.name, var.var_type(), var.value, note);
            }
            Ok(())
        }
        Err(failure) => {
            println!("Validation: FAILED");
            for err in failure.errors() {
                let label = find_variable(&definition, &err.variable_name)
                    .map(|v| v.display_label())
                    .unwrap_or(&err.variable_name);
                println!("  - {}: {}", label, err.reason);
            }
            anyhow::bail!("{} validation error(s) found", failure.len());
        }
    }
}

async fn cmd_start(
    engine: Arc<dyn EngineClient>,
    definition_id: &str,
    raw: RawVariables,
) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    match orchestrator.start(definition_id, Some(&raw)).await {
        Ok(instance_id) => {
            println!("Started instance: {}", instance_id);
            Ok(())
        }
        Err(OrchestratorError::Validation(failure)) => {
            println!("Validation: FAILED");
            for err in failure.errors() {
                println!("  - {}", err);
            }
            anyhow::bail!("Instance not started: {} validation error(s)", failure.len());
        }
        Err(e) => Err(e).context("Failed to start instance"),
    }
}

async fn cmd_transition(engine: Arc<dyn EngineClient>, instance_id: &str, suspend: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    let instance = if suspend {
        orchestrator.suspend(instance_id).await
    } else {
        orchestrator.resume(instance_id).await
    }
    .with_context(|| format!("Failed to update instance '{}'", instance_id))?;

    println!("Instance {}: {}", instance.id, instance.status);
    Ok(())
}

async fn load_definition(engine: &dyn EngineClient, id: &str) -> Result<ProcessDefinition> {
    engine
        .get_definition(id)
        .await
        .with_context(|| format!("Definition '{}' not found", id))
}

async fn cmd_copy(engine: Arc<dyn EngineClient>, definition_id: &str) -> Result<()> {
    let source = load_definition(engine.as_ref(), definition_id).await?;
    let orchestrator = Orchestrator::new(engine);
    let copy = orchestrator
        .copy(&source)
        .await
        .context("Failed to copy definition")?;

    println!("Created {} ({}), version {}", copy.name, copy.id, copy.version);
    Ok(())
}

async fn cmd_delete(engine: Arc<dyn EngineClient>, definition_id: &str) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    orchestrator
        .delete(definition_id)
        .await
        .with_context(|| format!("Failed to delete definition '{}'", definition_id))?;

    println!("Deleted definition {}", definition_id);
    if let Some(err) = orchestrator.definitions().error {
        warn!(error = %err, "Definition list could not be refreshed after delete");
    }
    Ok(())
}

async fn cmd_versions(
    engine: Arc<dyn EngineClient>,
    definition_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    let versions = orchestrator
        .versions(definition_id)
        .await
        .with_context(|| format!("Failed to list versions of '{}'", definition_id))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("No versions found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<9} {:<8} {:<12} {:<16} {}",
        "VERSION ID", "NUMBER", "CURRENT", "BRANCH", "AUTHOR", "MESSAGE"
    );
    println!("{}", "-".repeat(110));
    for v in &versions {
        let branch = v
            .branch_name
            .clone()
            .unwrap_or_else(|| v.branch_type.to_string());
        println!(
            "{:<38} {:<9} {:<8} {:<12} {:<16} {}",
            v.id,
            v.version_number,
            if v.is_current { "*" } else { "" },
            branch,
            v.author,
            v.commit_message
        );
    }

    println!("\nTotal: {} version(s)", versions.len());
    Ok(())
}

async fn cmd_restore(
    engine: Arc<dyn EngineClient>,
    version_id: &str,
    request: RestoreRequest,
) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    let restored = orchestrator
        .restore_version(version_id, &request)
        .await
        .with_context(|| format!("Failed to restore version '{}'", version_id))?;

    println!(
        "Restored as version {} ({}) of definition {}",
        restored.version_number, restored.id, restored.process_definition_id
    );
    if let Some(err) = orchestrator.definitions().error {
        warn!(error = %err, "Definition list could not be refreshed after restore");
    }
    Ok(())
}

async fn cmd_tokens(engine: Arc<dyn EngineClient>, instance_id: &str, format: OutputFormat) -> Result<()> {
    let orchestrator = Orchestrator::new(engine);
    let tokens = orchestrator
        .tokens(instance_id)
        .await
        .with_context(|| format!("Failed to read tokens of instance '{}'", instance_id))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&tokens)?);
        return Ok(());
    }

    if tokens.is_empty() {
        println!("No active tokens.");
        return Ok(());
    }

    println!("{:<32} {:<12} {:<20}", "NODE", "STATE", "SCOPE");
    println!("{}", "-".repeat(66));
    for token in &tokens {
        println!(
            "{:<32} {:<12} {:<20}",
            token.node_id,
            token.state,
            token.scope_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
