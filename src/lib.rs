use std::sync::Arc;

use derive_more::FromStr;
use serde::Serialize;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod executor;
pub mod joblog;
pub mod models;
pub mod queue;
pub mod verify;
pub mod webhooks;

use crate::executor::JobExecutor;
use crate::queue::TaskQueue;

#[derive(Debug, Default, Clone, Copy, FromStr, Serialize)]
pub enum Environment {
    Staging,
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn from_env() -> Self {
        std::env::var("ENVIRONMENT")
            .map(|s| s.parse())
            .inspect_err(|_| warn!("Did not find ENVIRONMENT env var, defaulting to development"))
            .unwrap_or(Ok(Environment::Development))
            .expect(
                "Invalid ENVIRONMENT env var, must be one of: development, production, or staging",
            )
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug,info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Consume verification tasks until shutdown. One task runs to completion at
/// a time; parallelism comes from running more worker processes.
pub fn run_worker(
    queue: Arc<dyn TaskQueue>,
    executor: Arc<JobExecutor>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutting down verification worker");
                    return;
                }
                task = queue.dequeue() => {
                    match task {
                        Ok(Some(task)) => {
                            info!(job_id = %task.job_id, lead_id = task.lead_id, "processing verification task");
                            if let Err(err) = executor.run(&task).await {
                                error!(job_id = %task.job_id, "verification task failed: {err}");
                            }
                        }
                        Ok(None) => {} // poll timeout, loop again
                        Err(err) => {
                            error!("failed to receive from task queue: {err}");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    })
}

pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = token.cancelled() => {},
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
