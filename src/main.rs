use anyhow::Result;
use clap::{Parser, Subcommand};
use mail_digest::builder::SqlContentStore;
use mail_digest::clock::{Clock, SystemClock};
use mail_digest::crm::HttpMailer;
use mail_digest::{config, db, digest, dispatch, scheduler};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a digest from the currently eligible content, without
    /// persisting anything.
    Preview,
    /// Create and populate a new digest from the eligible mailings.
    Prepare,
    /// List digests with status, creation time and sent-to groups.
    List,
    /// Re-render a previously prepared digest.
    View { digest_id: i64 },
    /// Send a prepared (or failed) digest to the recipient groups.
    Send { digest_id: i64 },
    /// Deliver a digest to the test groups, without a status change.
    SendTest { digest_id: i64 },
    /// Ask the validation contacts to review a digest.
    Notify { digest_id: i64 },
    /// One scheduler tick; run this from cron.
    Tick,
    /// Print an example configuration file.
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/digest.db?mode=rwc", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let clock = SystemClock;
    let store = SqlContentStore::new(pool.clone());
    let mailer = HttpMailer::from_config(&cfg.crm)?;

    match args.command {
        Command::Preview => {
            let rendered = digest::preview_digest(&pool, &cfg, &store, clock.now()).await?;
            println!("{}", rendered.body_html);
        }
        Command::Prepare => match digest::prepare_digest(&pool, &cfg, clock.now()).await? {
            Some(digest_id) => println!("prepared digest {digest_id}"),
            None => println!("no eligible content, nothing prepared"),
        },
        Command::List => {
            for summary in digest::list_digests(&pool).await? {
                println!(
                    "{}\t{}\t{}\tgroups: {:?}",
                    summary.digest_id, summary.status, summary.created_at, summary.group_ids
                );
            }
        }
        Command::View { digest_id } => {
            let rendered = digest::view_digest(&pool, &cfg, &store, digest_id).await?;
            println!("{}", rendered.body_html);
        }
        Command::Send { digest_id } => {
            let crm_mailing_id =
                dispatch::send_digest(&pool, &cfg, &store, &mailer, digest_id, clock.now()).await?;
            println!("digest {digest_id} sent as CRM mailing {crm_mailing_id}");
        }
        Command::SendTest { digest_id } => {
            dispatch::send_test_digest(&pool, &cfg, &store, &mailer, digest_id).await?;
            println!("digest {digest_id} delivered to test groups");
        }
        Command::Notify { digest_id } => {
            dispatch::notify_validators(&pool, &cfg, &store, &mailer, digest_id).await?;
            println!("validators notified for digest {digest_id}");
        }
        Command::Tick => {
            scheduler::execute_scheduler_operation(&pool, &cfg, &clock, &store, &mailer).await?;
            info!("scheduler tick completed");
        }
        Command::ExampleConfig => unreachable!("handled above"),
    }

    Ok(())
}
