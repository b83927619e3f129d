use anyhow::Context;
use mailprobe::executor::JobExecutor;
use mailprobe::models::PgExecutorStore;
use mailprobe::queue::RedisTaskQueue;
use mailprobe::verify::Verifier;
use mailprobe::verify::dns::HickoryDns;
use mailprobe::verify::sentinel::{MemorySentinel, RedisSentinel, Sentinel};
use mailprobe::verify::smtp::SmtpProber;
use mailprobe::verify::web::HttpWebSearch;
use mailprobe::webhooks::{HttpWebhookForwarder, NullWebhookDispatcher, WebhookDispatcher};
use mailprobe::{Environment, init_tracing, run_worker, shutdown_signal};
use sqlx::{
    ConnectOptions,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let environment = Environment::from_env();
    info!(environment = ?environment, "starting verification worker");

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set")?
        .parse()
        .expect("DATABASE_URL must be a valid URL");

    let db_options =
        PgConnectOptions::from_url(&database_url)?.application_name("mailprobe-worker");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(db_options)
        .await
        .context("failed to connect to database")?;

    #[cfg(feature = "apply-db-migrations")]
    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
    let redis_client = redis::Client::open(redis_url).context("invalid REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to redis")?;

    let helo_domain =
        std::env::var("SMTP_HELO_DOMAIN").unwrap_or_else(|_| "mailcheck.local".to_string());

    // The in-process sentinel is a single-node development convenience; a
    // production fleet must share the flag through redis.
    let sentinel: Arc<dyn Sentinel> = if std::env::var("SMTP_SENTINEL_IN_PROCESS").is_ok()
        && !matches!(environment, Environment::Production)
    {
        warn!("using in-process SMTP-blocked sentinel; the flag is not shared across workers");
        Arc::new(MemorySentinel::new())
    } else {
        Arc::new(RedisSentinel::new(redis_conn.clone()))
    };

    let dns = Arc::new(HickoryDns::new());
    let prober = Arc::new(SmtpProber::new(
        dns.clone(),
        sentinel.clone(),
        helo_domain,
    ));
    let verifier = Arc::new(Verifier::new(
        dns.clone(),
        prober,
        sentinel,
        Arc::new(HttpWebSearch::new()),
    ));

    let webhooks: Arc<dyn WebhookDispatcher> = match std::env::var("WEBHOOK_DISPATCH_URL") {
        Ok(endpoint) => Arc::new(HttpWebhookForwarder::new(endpoint)),
        Err(_) => {
            warn!("WEBHOOK_DISPATCH_URL not set, webhook events will be dropped");
            Arc::new(NullWebhookDispatcher)
        }
    };

    let store = Arc::new(PgExecutorStore::new(pool));
    let executor = Arc::new(JobExecutor::new(store, verifier, dns, webhooks));
    let queue = Arc::new(RedisTaskQueue::new(redis_conn));

    let shutdown = CancellationToken::new();
    let worker = run_worker(queue, executor, shutdown.clone());

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping worker");
    shutdown.cancel();

    tokio::select!(
        _ = worker => {
            info!("worker stopped");
        }
        // the running job gets a grace period before a hard stop
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            warn!("worker did not stop in time, exiting anyway");
        }
    );

    Ok(())
}
