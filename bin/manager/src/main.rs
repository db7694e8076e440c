//! The source provider manager process.
//!
//! Builds the application context, registers the in-tree provider
//! factories, and runs the manager under the supervisor: SIGHUP restarts
//! with linear backoff, SIGINT/SIGTERM stop gracefully.

use operion_provider::{ProviderDeps, ProviderRegistry, TickProviderFactory};
use operion_runtime::{
    ApplicationContext, OperionConfig, SourceProviderManager, Supervisor, SupervisorVerdict,
    os_signals,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &OperionConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match OperionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    let manager_id = config.manager_instance_id();
    tracing::info!(manager_id, "starting source provider manager");

    let context = match ApplicationContext::build(&config, &manager_id).await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(TickProviderFactory));
    tracing::info!(providers = ?registry.provider_ids(), "registered provider factories");
    if !Path::new(&config.plugins_path).is_dir() {
        tracing::debug!(path = %config.plugins_path, "plugins path does not exist");
    }

    let mut provider_config = serde_json::Map::new();
    provider_config.insert(
        "webhook_port".to_string(),
        serde_json::Value::from(config.webhook_port),
    );
    provider_config.insert(
        "plugins_path".to_string(),
        serde_json::Value::from(config.plugins_path.clone()),
    );

    let manager = SourceProviderManager::new(
        manager_id,
        Arc::new(registry),
        config.provider_allowlist(),
        provider_config,
        ProviderDeps {
            workflow_repository: Arc::clone(&context.workflows),
        },
        Arc::clone(&context.event_bus),
        Arc::clone(&context.source_bus),
    );

    let signals = match os_signals() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let verdict = Supervisor::new(Arc::new(manager)).run(signals).await;

    if let Err(e) = context.source_bus.close().await {
        tracing::warn!(error = %e, "source bus close failed");
    }
    if let Err(e) = context.event_bus.close().await {
        tracing::warn!(error = %e, "event bus close failed");
    }

    match verdict {
        SupervisorVerdict::GracefulShutdown => ExitCode::SUCCESS,
        SupervisorVerdict::RestartLimitExceeded => ExitCode::FAILURE,
    }
}
