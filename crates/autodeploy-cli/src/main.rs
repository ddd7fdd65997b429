//! agent-autodeploy CLI
//!
//! The `autodeploy` command turns image-publish events into prepared agents
//! and drives the build-and-wait deployment client.
//!
//! ## Commands
//!
//! - `handle-event`: Orchestrate one publish event (file or stdin)
//! - `deploy`: Start a build and wait until the endpoint runs the new image
//! - `records`: Inspect deployment records
//! - `endpoint`: Show the endpoint update ledger
//! - `config`: Show or check the effective configuration

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use autodeploy_core::aws::{
    AwsClient, BedrockAgentApi, CodeBuildRunner, EcrRegistry, LambdaEndpoint,
};
use autodeploy_core::metrics::METRICS;
use autodeploy_core::{
    DeployConfig, DeploymentClient, HandleOutcome, Orchestrator, PublishEvent,
};
use autodeploy_state::{
    DeploymentId, DeploymentStore, EndpointLedger, SurrealDeploymentStore, SurrealHandle,
};

#[derive(Parser)]
#[command(name = "autodeploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Event-driven agent deployment orchestrator", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "AUTODEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Orchestrate one image-publish event
    HandleEvent {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },

    /// Start a build and wait until the endpoint runs the new image
    Deploy,

    /// Inspect deployment records
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Endpoint update ledger
    Endpoint {
        #[command(subcommand)]
        action: EndpointAction,
    },

    /// Effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List deployment records, newest first
    List {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one deployment record as JSON
    Show {
        /// Deployment id
        id: String,
    },
}

#[derive(Subcommand)]
enum EndpointAction {
    /// Show the last applied endpoint reference
    Current,
    /// Show applied endpoint references, newest first
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the effective configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autodeploy_core::telemetry::init_tracing(cli.json, level);

    let config = DeployConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::HandleEvent { event } => {
            let store = open_store().await?;
            cmd_handle_event(config, store, &event).await
        }
        Commands::Deploy => cmd_deploy(config).await,
        Commands::Records { action } => {
            let store = open_store().await?;
            match action {
                RecordsAction::List { limit } => cmd_records_list(store.as_ref(), limit).await,
                RecordsAction::Show { id } => cmd_records_show(store.as_ref(), &id).await,
            }
        }
        Commands::Endpoint { action } => {
            let store = open_store().await?;
            match action {
                EndpointAction::Current => cmd_endpoint_current(store.as_ref()).await,
                EndpointAction::History { limit } => {
                    cmd_endpoint_history(store.as_ref(), limit).await
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&config),
            ConfigAction::Check => cmd_config_check(&config),
        },
    }
}

async fn open_store() -> Result<Arc<SurrealDeploymentStore>> {
    let handle = SurrealHandle::setup_from_env()
        .await
        .context("Failed to connect to deployment database")?;
    Ok(Arc::new(SurrealDeploymentStore::new(Arc::new(handle))))
}

fn aws_client(config: &DeployConfig) -> Result<AwsClient> {
    AwsClient::from_env(Some(&config.region)).context("Failed to load AWS credentials")
}

/// Read an event payload from `source` (`-` is stdin).
fn read_event(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read event from stdin")?;
        return Ok(buf);
    }
    std::fs::read(Path::new(source)).with_context(|| format!("Failed to read event file {}", source))
}

// ========== Event Handling ==========

async fn cmd_handle_event(
    config: DeployConfig,
    store: Arc<SurrealDeploymentStore>,
    source: &str,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let payload = read_event(source)?;

    let client = aws_client(&config)?;
    let endpoint_function = config.endpoint_function.clone();
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(EcrRegistry::new(client.clone())),
        Arc::new(LambdaEndpoint::new(client.clone(), endpoint_function)),
        Arc::new(BedrockAgentApi::new(client)),
        store.clone(),
        store,
    );

    let outcome = handle_payload(&orchestrator, &payload).await;
    METRICS.flush();
    let outcome = outcome?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.is_failure() {
        anyhow::bail!("Deployment failed");
    }
    Ok(())
}

async fn handle_payload(orchestrator: &Orchestrator, payload: &[u8]) -> Result<HandleOutcome> {
    let event = PublishEvent::from_json(payload).context("Invalid publish event")?;
    info!(repository = %event.repository(), "handling publish event");
    let outcome = orchestrator
        .handle(&event)
        .await
        .context("Event handling failed")?;
    Ok(outcome)
}

// ========== Deployment Client ==========

async fn cmd_deploy(config: DeployConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let client = aws_client(&config)?;
    let project = config.build_project.clone();
    let endpoint_function = config.endpoint_function.clone();

    let deployer = DeploymentClient::new(
        config,
        Arc::new(CodeBuildRunner::new(client.clone(), project)),
        Arc::new(EcrRegistry::new(client.clone())),
        Arc::new(LambdaEndpoint::new(client, endpoint_function)),
    );

    let report = deployer.run().await.context("Deployment client failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.outcome.is_success() {
        anyhow::bail!("Deployment did not complete: {}", report.outcome);
    }
    Ok(())
}

// ========== Records ==========

async fn cmd_records_list(store: &dyn DeploymentStore, limit: usize) -> Result<()> {
    let records = store.list(limit).await?;
    if records.is_empty() {
        println!("No deployment records");
        return Ok(());
    }

    for record in records {
        println!(
            "{} {} {} {} {}",
            record.created_at.to_rfc3339(),
            record.deployment_id,
            record.agent_name,
            record.state,
            record.agent_id.as_deref().unwrap_or("-")
        );
        if let Some(failure) = &record.failure {
            println!(
                "    {} during {} (after {}): {}",
                failure.kind, failure.transition, failure.last_successful_step, failure.message
            );
        }
    }
    Ok(())
}

async fn cmd_records_show(store: &dyn DeploymentStore, id: &str) -> Result<()> {
    let record = store
        .get(&DeploymentId(id.to_string()))
        .await
        .with_context(|| format!("Failed to load deployment {}", id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

// ========== Endpoint Ledger ==========

async fn cmd_endpoint_current(ledger: &dyn EndpointLedger) -> Result<()> {
    match ledger.last_applied().await? {
        Some(entry) => println!(
            "{} -> {} (deployment {}, {})",
            entry.endpoint.target,
            entry.endpoint.image_uri,
            entry.deployment_id,
            entry.applied_at.to_rfc3339()
        ),
        None => println!("No endpoint update recorded"),
    }
    Ok(())
}

async fn cmd_endpoint_history(ledger: &dyn EndpointLedger, limit: usize) -> Result<()> {
    let history = ledger.history(limit).await?;
    if history.is_empty() {
        println!("No endpoint update recorded");
        return Ok(());
    }
    for entry in history {
        println!(
            "{} {} {}",
            entry.applied_at.to_rfc3339(),
            entry.endpoint.digest,
            entry.deployment_id
        );
    }
    Ok(())
}

// ========== Configuration ==========

fn cmd_config_show(config: &DeployConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_config_check(config: &DeployConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!(
        "Configuration OK: repository {}, endpoint {}, {} tools ({})",
        config.repository,
        config.endpoint_function,
        config.tools.len(),
        config.tools.tool_names().join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodeploy_core::fakes::{CallLog, FakeAgentApi, FakeEndpoint, FakeRegistry};
    use autodeploy_state::fakes::{MemoryDeploymentStore, MemoryEndpointLedger};
    use autodeploy_state::{ArtifactRef, DeploymentState, ImageDigest};
    use chrono::{TimeZone, Utc};

    fn config() -> DeployConfig {
        let mut config = DeployConfig {
            agent_role_arn: "arn:aws:iam::123456789012:role/AgentRole".to_string(),
            ..DeployConfig::default()
        };
        config.policies.agent_settle = autodeploy_core::RetryPolicy::fixed(10, 1_000);
        config.policies.preparation = autodeploy_core::RetryPolicy::fixed(10, 1_000);
        config.policies.endpoint_ready = autodeploy_core::RetryPolicy::fixed(10, 1_000);
        config
    }

    fn orchestrator(store: Arc<MemoryDeploymentStore>) -> Orchestrator {
        let log = CallLog::new();
        let registry = FakeRegistry::new(log.clone()).with_images(vec![ArtifactRef {
            repository: "agent-core-tools".to_string(),
            registry_id: "123456789012".to_string(),
            digest: ImageDigest::parse("sha256:abc").unwrap(),
            tags: vec!["latest".to_string()],
            pushed_at: Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
        }]);
        Orchestrator::new(
            config(),
            Arc::new(registry),
            Arc::new(FakeEndpoint::new(log.clone())),
            Arc::new(FakeAgentApi::new(log)),
            store,
            Arc::new(MemoryEndpointLedger::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn handle_payload_deploys_push_event() {
        let store = Arc::new(MemoryDeploymentStore::new());
        let orchestrator = orchestrator(store.clone());
        let payload = br#"{"detail": {"repository-name": "agent-core-tools", "result": "SUCCESS", "action-type": "PUSH"}}"#;

        let outcome = handle_payload(&orchestrator, payload).await.unwrap();
        let record = outcome.record().unwrap();
        assert_eq!(record.state, DeploymentState::Ready);
        assert_eq!(record.agent_name, "agent-core-20240305-070809");

        cmd_records_list(store.as_ref(), 10).await.unwrap();
        cmd_records_show(store.as_ref(), &record.deployment_id.0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handle_payload_rejects_garbage() {
        let orchestrator = orchestrator(Arc::new(MemoryDeploymentStore::new()));
        let err = handle_payload(&orchestrator, b"not json").await.unwrap_err();
        assert!(err.to_string().contains("Invalid publish event"));
    }

    #[tokio::test]
    async fn records_show_unknown_id_fails() {
        let store = MemoryDeploymentStore::new();
        assert!(cmd_records_show(&store, "missing").await.is_err());
    }

    #[tokio::test]
    async fn endpoint_commands_handle_empty_ledger() {
        let ledger = MemoryEndpointLedger::new();
        cmd_endpoint_current(&ledger).await.unwrap();
        cmd_endpoint_history(&ledger, 5).await.unwrap();
    }

    #[test]
    fn read_event_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, br#"{"repository-name": "x", "result": "SUCCESS"}"#).unwrap();
        let bytes = read_event(path.to_str().unwrap()).unwrap();
        assert!(PublishEvent::from_json(&bytes).is_ok());
        assert!(read_event("/nonexistent/event.json").is_err());
    }

    #[test]
    fn config_check_requires_role() {
        assert!(cmd_config_check(&DeployConfig::default()).is_err());
        assert!(cmd_config_check(&config()).is_ok());
        cmd_config_show(&config()).unwrap();
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["autodeploy", "records", "list", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Records {
                action: RecordsAction::List { limit: 5 }
            }
        ));

        let cli = Cli::try_parse_from(["autodeploy", "--json", "handle-event", "-e", "ev.json"])
            .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::HandleEvent { event } if event == "ev.json"));
    }
}
