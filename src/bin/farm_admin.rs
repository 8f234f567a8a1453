use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use farm_digest::config;
use farm_digest::db::{self, NewSubject};
use farm_digest::llm::OpenAiClient;
use farm_digest::model::{NewReading, TimeOfDay};
use farm_digest::pipeline::{DispatchPipeline, DispatchSettings};
use farm_digest::store::SqliteStore;
use farm_digest::whatsapp::WhatsAppClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage subscribers and trigger updates by hand")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a subscriber
    AddSubject {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        crop: String,
        #[arg(long, default_value = "English")]
        language: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        /// Daily notification time, HH:MM
        #[arg(long)]
        at: Option<TimeOfDay>,
    },
    /// Change or clear (omit --at) a subscriber's daily notification time
    SetTime {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        at: Option<TimeOfDay>,
    },
    /// Record one sensor reading for a subscriber
    AddReading {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        ph: f64,
        #[arg(long)]
        nitrogen: f64,
        #[arg(long)]
        phosphorus: f64,
        #[arg(long)]
        potassium: f64,
        #[arg(long)]
        temperature: f64,
        #[arg(long)]
        moisture: f64,
        #[arg(long)]
        conductivity: f64,
        #[arg(long)]
        battery: f64,
    },
    /// Run the daily update for one subscriber now
    Dispatch {
        #[arg(long)]
        phone: String,
    },
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

    match args.command {
        Command::AddSubject {
            phone,
            crop,
            language,
            name,
            profile,
            at,
        } => {
            let mut subject = NewSubject::new(phone, language, crop);
            subject.name = name;
            subject.profile = profile;
            subject.notify_at = at;
            let id = db::insert_subject(&pool, &subject).await?;
            info!(id, phone = %subject.phone, "subject added");
        }
        Command::SetTime { phone, at } => {
            let subject = db::find_subject_by_phone(&pool, &phone)
                .await?
                .ok_or_else(|| anyhow!("no subject with phone {}", phone))?;
            db::set_notify_time(&pool, subject.id, at).await?;
            match at {
                Some(at) => info!(id = subject.id, time = %at, "notification time set"),
                None => info!(id = subject.id, "notification time cleared"),
            }
        }
        Command::AddReading {
            phone,
            ph,
            nitrogen,
            phosphorus,
            potassium,
            temperature,
            moisture,
            conductivity,
            battery,
        } => {
            let subject = db::find_subject_by_phone(&pool, &phone)
                .await?
                .ok_or_else(|| anyhow!("no subject with phone {}", phone))?;
            let reading = NewReading {
                ph,
                nitrogen,
                phosphorus,
                potassium,
                temperature,
                moisture,
                conductivity,
                battery,
            };
            let id = db::insert_reading(&pool, subject.id, &reading, Utc::now()).await?;
            info!(id, subject_id = subject.id, "reading recorded");
        }
        Command::Dispatch { phone } => {
            let pipeline = DispatchPipeline::new(
                Arc::new(SqliteStore::new(pool)),
                Arc::new(OpenAiClient::from_config(&cfg)?),
                Arc::new(WhatsAppClient::from_config(&cfg)?),
                DispatchSettings::from_config(&cfg)?,
            );
            let outcome = pipeline.run(&phone).await;
            if let Some(err) = outcome.failure {
                return Err(anyhow!(err));
            }
            for issue in &outcome.degraded {
                warn!(%issue, "dispatch degraded");
            }
            println!("{}", outcome.text.unwrap_or_default());
        }
    }

    Ok(())
}
