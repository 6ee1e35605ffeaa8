use std::io;

use chrono::Utc;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use outreach_engine::provider::{ProviderClient, ProviderConfig};
use outreach_engine::scheduler::reconcile::Reconciler;
use outreach_engine::scheduler::{Dispatcher, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "run_pass",
    about = "Run one scheduling pass against the send queue and exit"
)]
struct Args {
    /// Only reconcile items stuck in processing; select and send nothing.
    #[arg(long)]
    reconcile_only: bool,

    /// Apply pending database migrations before running.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    if args.migrate {
        outreach_engine::db::run_migrations(&pool).await?;
    }

    let config = SchedulerConfig::from_env();
    let provider = ProviderClient::new(ProviderConfig::from_env())?;

    if args.reconcile_only {
        let reconciler = Reconciler::new(pool, provider, config);
        let summary = reconciler
            .run(Utc::now())
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        println!(
            "Reconciled {} stale item(s): {} confirmed sent, {} requeued, {} failed, {} unresolved",
            summary.examined,
            summary.confirmed_sent,
            summary.requeued,
            summary.failed,
            summary.unresolved
        );
    } else {
        let dispatcher = Dispatcher::new(pool, provider, config);
        let summary = dispatcher
            .run_pass()
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        println!(
            "Pass complete: {} selected, {} sent, {} deferred, {} failed, {} skipped, {} conflict(s), {} ambiguous, {} reconciled",
            summary.selected,
            summary.sent,
            summary.deferred,
            summary.failed,
            summary.skipped,
            summary.conflicts,
            summary.ambiguous,
            summary.reconciled.examined
        );
    }

    Ok(())
}
