//! The activator process.
//!
//! Builds the application context and runs the activator under the
//! supervisor: SIGHUP restarts with linear backoff, SIGINT/SIGTERM stop
//! gracefully.

use operion_runtime::{
    Activator, ApplicationContext, OperionConfig, Supervisor, SupervisorVerdict, os_signals,
};
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

    let activator_id = config.activator_instance_id();
    tracing::info!(activator_id, "starting activator");

    let context = match ApplicationContext::build(&config, &activator_id).await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let activator = Activator::new(
        activator_id,
        Arc::clone(&context.event_bus),
        Arc::clone(&context.source_bus),
        Arc::clone(&context.nodes),
        Arc::clone(&context.executions),
    );

    let signals = match os_signals() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let verdict = Supervisor::new(Arc::new(activator)).run(signals).await;

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
