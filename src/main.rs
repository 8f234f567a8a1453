use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use farm_digest::config;
use farm_digest::db;
use farm_digest::dispatch::Dispatcher;
use farm_digest::llm::OpenAiClient;
use farm_digest::pipeline::{DispatchPipeline, DispatchSettings};
use farm_digest::reconcile::Reconciler;
use farm_digest::store::SqliteStore;
use farm_digest::timer::TokioScheduler;
use farm_digest::whatsapp::WhatsAppClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Send each subscriber a daily crop status update")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let pipeline = Arc::new(DispatchPipeline::new(
        store.clone(),
        Arc::new(OpenAiClient::from_config(&cfg)?),
        Arc::new(WhatsAppClient::from_config(&cfg)?),
        DispatchSettings::from_config(&cfg)?,
    ));
    let reconciler = Reconciler::with_dispatcher(
        store,
        Arc::new(TokioScheduler::new()),
        cfg.timezone()?,
        Dispatcher::new(pipeline),
    );

    info!(
        timezone = %cfg.app.timezone,
        refresh_secs = cfg.app.refresh_interval_secs,
        "starting schedule reconciliation"
    );
    let every = cfg.refresh_interval();
    let loop_task = tokio::spawn(reconciler.run(every));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    loop_task.abort();
    Ok(())
}
