use anyhow::Context;
use sqlx::{
    ConnectOptions,
    postgres::{PgConnectOptions, PgPoolOptions},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    mailprobe::init_tracing();

    let environment = mailprobe::Environment::from_env();
    tracing::info!(environment = ?environment, "applying database migrations");

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set")?
        .parse()
        .expect("DATABASE_URL must be a valid URL");

    let db_options =
        PgConnectOptions::from_url(&database_url)?.application_name("mailprobe-migrate-db");

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(db_options)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("migrations applied");

    Ok(())
}
