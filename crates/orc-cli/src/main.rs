//! The `orc` binary: parses CLI arguments, loads and validates the process
//! configuration, wires every component named in this workspace into one
//! running control plane, and serves the §6 HTTP/WebSocket surface until the
//! operator stops it or the process receives a shutdown signal. Grounded on
//! `agentor-cli/src/main.rs`'s `clap::Parser` + `toml::from_str` +
//! `tracing_subscriber::fmt().init()` startup sequence, with the teacher's
//! TLS, skill-loading, and chat-session wiring dropped — none of it has a
//! counterpart in this system.

mod logging;
mod providers;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use orc_core::{AgentId, OrchestratorConfig, Role};
use orc_coordinator::CoordinatorConfig;
use orc_gateway::GatewayState;
use orc_provider::{Clock, RealClock};
use orc_repo::{GitRepositoryGateway, RepositoryGateway};
use orc_service::{AgentTask, AlignmentNegotiation, OrchestratorService};
use orc_structurer::StructurerConfig;
use orc_worker::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "orc", about = "Multi-agent code-generation orchestrator control plane")]
struct Cli {
    /// Path to the process configuration (TOML).
    #[arg(short, long, default_value = "orchestrator.toml")]
    config: std::path::PathBuf,

    /// Address to bind the HTTP/WebSocket surface to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP/WebSocket surface to.
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_lines = logging::init();

    let config = OrchestratorConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from '{}'", cli.config.display()))?;
    info!(target = %config.target, "configuration loaded");

    let service = Arc::new(OrchestratorService::new(config.clone()));
    tokio::spawn(logging::forward_to_service(log_lines, service.clone()));
    tokio::spawn(
        service
            .clone()
            .reap_forever(Duration::from_millis(config.claim_lease_ms), Duration::from_secs(5)),
    );

    let repo: Arc<dyn RepositoryGateway> = Arc::new(
        GitRepositoryGateway::open(&config.paths.repo_dir)
            .with_context(|| format!("opening repository at '{}'", config.paths.repo_dir.display()))?,
    );
    service
        .update_structure(repo.tree().await.context("enumerating initial repository tree")?)
        .await;

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let negotiation = Arc::new(AlignmentNegotiation::new());
    let mut adapters = providers::ProviderCache::new();

    let tasks = build_tasks(&config, &service, &repo, &clock, &negotiation, &mut adapters)?;

    let state = GatewayState::new(service.clone(), repo.clone(), tasks);
    let app = orc_gateway::router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding '{addr}'"))?;
    info!(%addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service.clone()))
        .await
        .context("serving the orchestrator HTTP surface")?;

    Ok(())
}

async fn shutdown_signal(service: Arc<OrchestratorService>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping every agent");
    service.stop_all().await;
}

type BoxedAgentFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

fn spawn_closure<F>(f: F) -> AgentTask
where
    F: Fn(CancellationToken) -> BoxedAgentFuture + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build one `AgentTask` closure per supervised agent (§4.4), each closing
/// over the shared service/gateway/provider handles it needs. Handed
/// straight to `GatewayState` so `/start_{ai1,ai2,ai3}`/`/start_all` can
/// spawn them under the Supervisor on operator request.
fn build_tasks(
    config: &OrchestratorConfig,
    service: &Arc<OrchestratorService>,
    repo: &Arc<dyn RepositoryGateway>,
    clock: &Arc<dyn Clock>,
    negotiation: &Arc<AlignmentNegotiation>,
    adapters: &mut providers::ProviderCache,
) -> anyhow::Result<HashMap<AgentId, AgentTask>> {
    let mut tasks: HashMap<AgentId, AgentTask> = HashMap::new();
    let target = config.target.clone();

    let coordinator_config = CoordinatorConfig::from_orchestrator_config(config);
    let coordinator_provider = adapters.get(&config.coordinator_model.provider)?;
    tasks.insert(
        AgentId::Coordinator,
        {
            let service = service.clone();
            let negotiation = negotiation.clone();
            let provider = coordinator_provider;
            let clock = clock.clone();
            let config = coordinator_config;
            let target = target.clone();
            spawn_closure(move |token| {
                let service = service.clone();
                let negotiation = negotiation.clone();
                let provider = provider.clone();
                let clock = clock.clone();
                let config = config.clone();
                let target = target.clone();
                Box::pin(async move {
                    orc_coordinator::run(service, negotiation, provider, clock, config, target, token).await
                })
            })
        },
    );

    for role in Role::ALL {
        let worker_config = WorkerConfig::from_orchestrator_config(config, role);
        let provider = adapters.get(&worker_config.model.provider)?;
        let agent = AgentId::from(role);
        let service = service.clone();
        let clock = clock.clone();
        tasks.insert(
            agent,
            spawn_closure(move |token| {
                let service = service.clone();
                let provider = provider.clone();
                let clock = clock.clone();
                let config = worker_config.clone();
                let worker_id = format!("{role}-{}", uuid::Uuid::new_v4());
                Box::pin(async move { orc_worker::run(role, worker_id, service, provider, clock, config, token).await })
            }),
        );
    }

    let structurer_config = StructurerConfig {
        model: config.structurer_model.clone(),
        request_timeout: Duration::from_millis(config.request_timeout_ms),
    };
    let structurer_provider = adapters.get(&config.structurer_model.provider)?;
    tasks.insert(
        AgentId::Structurer,
        {
            let service = service.clone();
            let negotiation = negotiation.clone();
            let provider = structurer_provider;
            let clock = clock.clone();
            let repo = repo.clone();
            let config = structurer_config;
            let target = target.clone();
            spawn_closure(move |token| {
                let service = service.clone();
                let negotiation = negotiation.clone();
                let provider = provider.clone();
                let clock = clock.clone();
                let repo = repo.clone();
                let config = config.clone();
                let target = target.clone();
                Box::pin(async move {
                    orc_structurer::run(service, negotiation, provider, clock, repo, config, target, token).await
                })
            })
        },
    );

    Ok(tasks)
}
