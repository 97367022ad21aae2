//! CLI entry point: `serve` runs the full worker process (webhook gateway,
//! outbox processor, optional broker worker, stuck-agent reaper, heartbeat);
//! `sweep` runs one outbox pass and exits; `config show` prints the
//! effective merged configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets, Cell, ContentArrangement, Table};
use uuid::Uuid;

use orchestrator_core::domain::ports::{Broker, ExternalAgentClient};
use orchestrator_core::infrastructure::agent_client::HttpAgentClient;
use orchestrator_core::infrastructure::broker::InMemoryBroker;
use orchestrator_core::infrastructure::config::ConfigLoader;
use orchestrator_core::infrastructure::database::{
    initialize_database, PoolConfig, SqliteAgentStateRepository, SqliteEventRepository, SqliteHealthRepository,
    SqliteOrchestrationRepository, SqliteOutboxRepository,
};
use orchestrator_core::infrastructure::llm::HttpLlmClient;
use orchestrator_core::infrastructure::logging::LoggerHandle;
use orchestrator_core::infrastructure::tester::ShellTester;
use orchestrator_core::infrastructure::webhook::{router as webhook_router, WebhookState};
use orchestrator_core::services::{
    Analyzer, BrokerWorker, Heartbeat, ModelValidator, Orchestrator, OutboxProcessor, StateStore, StuckAgentReaper,
    TaskDispatcher,
};

#[derive(Parser)]
#[command(name = "orchestrator-core", about = "Webhook-driven orchestration core", version)]
struct Cli {
    /// Path to a config YAML file. Defaults to the standard
    /// `.orchestrator/config.yaml` + `.orchestrator/local.yaml` merge chain.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full worker process until interrupted.
    Serve,
    /// Run a single outbox sweep and exit. Useful for cron-driven deployments.
    Sweep,
    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the merged configuration as YAML, with secrets redacted.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration file")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    match cli.command {
        Command::Config { action: ConfigAction::Show } => {
            print_config_summary(&config);
            print_config(&config)?;
            Ok(())
        }
        Command::Sweep => {
            let _logger = LoggerHandle::init(&config.logging)?;
            let pool = initialize_database(&config.database.path, Some(pool_config(&config))).await?;
            let worker_id = format!("sweep-{}", Uuid::new_v4());

            let agent_client: Arc<dyn ExternalAgentClient> = Arc::new(HttpAgentClient::new(&config.agent_client)?);
            let orchestrations = Arc::new(SqliteOrchestrationRepository::new(pool.clone()));
            let events = Arc::new(SqliteEventRepository::new(pool.clone()));
            let outbox = Arc::new(SqliteOutboxRepository::new(pool.clone()));
            let states = Arc::new(StateStore::new(Arc::new(SqliteAgentStateRepository::new(pool.clone()))));

            let orchestrator = Arc::new(build_orchestrator(&config, agent_client, orchestrations.clone(), events.clone(), states)?);

            let processor = OutboxProcessor::new(
                outbox,
                orchestrations,
                events,
                orchestrator,
                worker_id,
                config.outbox.poll_interval(),
                config.outbox.batch_size,
                config.outbox.base_delay(),
                config.outbox.stuck_job_timeout(),
                config.outbox.reaper_interval(),
            );

            let processed = processor.sweep_once().await?;
            println!("processed {processed} outbox job(s)");
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

fn pool_config(config: &orchestrator_core::domain::models::Config) -> PoolConfig {
    PoolConfig { max_connections: config.database.max_connections, ..Default::default() }
}

fn build_orchestrator(
    config: &orchestrator_core::domain::models::Config,
    agent_client: Arc<dyn ExternalAgentClient>,
    orchestrations: Arc<SqliteOrchestrationRepository>,
    events: Arc<SqliteEventRepository>,
    states: Arc<StateStore>,
) -> Result<Orchestrator> {
    let llm = Arc::new(HttpLlmClient::new(&config.llm)?);
    let analyzer = Arc::new(Analyzer::new(llm));
    let model_validator = Arc::new(ModelValidator::new(agent_client.clone()));
    let dispatcher = Arc::new(TaskDispatcher::new(
        agent_client.clone(),
        states.clone(),
        model_validator,
        config.webhook.clone(),
        config.orchestration.max_parallel_agents,
    ));
    let tester = Some(Arc::new(ShellTester::new(&config.tester)) as Arc<dyn orchestrator_core::domain::ports::Tester>);

    Ok(Orchestrator::new(
        orchestrations,
        events,
        states,
        agent_client,
        analyzer,
        dispatcher,
        tester,
        config.agent_client.api_key.clone(),
        config.orchestration.max_iterations,
        config.orchestration.quality_threshold,
    ))
}

async fn serve(config: orchestrator_core::domain::models::Config) -> Result<()> {
    let _logger = LoggerHandle::init(&config.logging)?;
    tracing::info!(bind_addr = %config.webhook.bind_addr, "starting orchestrator-core");

    let pool = initialize_database(&config.database.path, Some(pool_config(&config))).await?;
    let worker_id = format!("worker-{}", Uuid::new_v4());

    let agent_client: Arc<dyn ExternalAgentClient> = Arc::new(HttpAgentClient::new(&config.agent_client)?);
    let agent_states = Arc::new(SqliteAgentStateRepository::new(pool.clone()));
    let orchestrations = Arc::new(SqliteOrchestrationRepository::new(pool.clone()));
    let events = Arc::new(SqliteEventRepository::new(pool.clone()));
    let outbox = Arc::new(SqliteOutboxRepository::new(pool.clone()));
    let health = Arc::new(SqliteHealthRepository::new(pool.clone()));
    let states = Arc::new(StateStore::new(agent_states.clone()));

    let orchestrator = Arc::new(build_orchestrator(
        &config,
        agent_client.clone(),
        orchestrations.clone(),
        events.clone(),
        states.clone(),
    )?);

    let broker: Option<Arc<dyn Broker>> = if config.broker.enabled {
        let (broker, receiver) = InMemoryBroker::channel(1024);
        let broker = Arc::new(broker);
        let worker = Arc::new(BrokerWorker::new(
            receiver,
            orchestrator.clone(),
            config.broker.concurrency,
            config.broker.max_attempts,
            Duration::from_secs(config.broker.initial_backoff_secs),
        ));
        tokio::spawn(async move { worker.run().await });
        Some(broker as Arc<dyn Broker>)
    } else {
        None
    };

    let webhook_state = Arc::new(WebhookState {
        secret: config.webhook.secret.clone(),
        orchestrations: orchestrations.clone(),
        agent_states: agent_states.clone(),
        events: events.clone(),
        outbox: outbox.clone(),
        outbox_max_attempts: config.outbox.max_attempts,
        broker: broker.clone(),
    });
    let app = webhook_router(webhook_state);
    let listener = tokio::net::TcpListener::bind(&config.webhook.bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook gateway on {}", config.webhook.bind_addr))?;

    let outbox_processor = Arc::new(OutboxProcessor::new(
        outbox.clone(),
        orchestrations.clone(),
        events.clone(),
        orchestrator.clone(),
        worker_id.clone(),
        config.outbox.poll_interval(),
        config.outbox.batch_size,
        config.outbox.base_delay(),
        config.outbox.stuck_job_timeout(),
        config.outbox.reaper_interval(),
    ));

    let reaper = Arc::new(StuckAgentReaper::new(
        states,
        agent_client.clone(),
        config.agent_client.api_key.clone(),
        config.orchestration.agent_timeout(),
        config.outbox.reaper_interval(),
    ));

    let heartbeat = Arc::new(Heartbeat::new(
        health,
        outbox,
        broker,
        "orchestrator-core".to_string(),
        worker_id,
        config.orchestration.heartbeat_interval(),
    ));

    let server_task = tokio::spawn(async move { axum::serve(listener, app).await });
    let outbox_task = tokio::spawn(async move { outbox_processor.run().await });
    let reaper_task = tokio::spawn(async move { reaper.run().await });
    let heartbeat_task = tokio::spawn(async move { heartbeat.run().await });

    tokio::select! {
        result = server_task => { result?.context("webhook gateway exited")?; }
        _ = outbox_task => {}
        _ = reaper_task => {}
        _ = heartbeat_task => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}

/// A compact at-a-glance table of the thresholds an operator most often
/// needs to confirm, printed above the full YAML dump.
fn print_config_summary(config: &orchestrator_core::domain::models::Config) {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("SETTING"), Cell::new("VALUE")]);
    table.add_row(vec![Cell::new("max_iterations"), Cell::new(config.orchestration.max_iterations)]);
    table.add_row(vec![Cell::new("max_parallel_agents"), Cell::new(config.orchestration.max_parallel_agents)]);
    table.add_row(vec![Cell::new("quality_threshold"), Cell::new(config.orchestration.quality_threshold)]);
    table.add_row(vec![Cell::new("agent_timeout"), Cell::new(format!("{:?}", config.orchestration.agent_timeout()))]);
    table.add_row(vec![Cell::new("outbox_poll_interval"), Cell::new(format!("{:?}", config.outbox.poll_interval()))]);
    table.add_row(vec![Cell::new("heartbeat_interval"), Cell::new(format!("{:?}", config.orchestration.heartbeat_interval()))]);
    table.add_row(vec![Cell::new("broker_enabled"), Cell::new(config.broker.enabled)]);
    println!("{table}\n");
}

fn print_config(config: &orchestrator_core::domain::models::Config) -> Result<()> {
    let mut redacted = serde_yaml::to_value(config)?;
    redact(&mut redacted, &["api_key", "secret"]);
    println!("{}", serde_yaml::to_string(&redacted)?);
    Ok(())
}

/// Replaces any object key in `keys` with `"[REDACTED]"`, recursively, so
/// `config show` never prints `agent_client.api_key`/`llm.api_key`/
/// `webhook.secret` in the clear.
fn redact(value: &mut serde_yaml::Value, keys: &[&str]) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                let is_secret = k.as_str().is_some_and(|k| keys.contains(&k)) && v.as_str().is_some_and(|s| !s.is_empty());
                if is_secret {
                    *v = serde_yaml::Value::String("[REDACTED]".to_string());
                } else {
                    redact(v, keys);
                }
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                redact(item, keys);
            }
        }
        _ => {}
    }
}
