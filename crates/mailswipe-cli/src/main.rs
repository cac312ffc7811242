use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mailswipe_storage::{RemoteReplica, SearchField, SqliteStore, StoredRecord};
use mailswipe_sync::{
    backfill_remote, monitor_from_config, remote_replica, report_recent_markdown, MonitorConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mailswipe")]
#[command(about = "Incremental mailbox ingestion with local and remote persistence")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll the mailbox until interrupted.
    Monitor {
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_minutes: Option<u64>,
        #[arg(long)]
        no_remote: bool,
    },
    /// Run a single cycle and exit.
    Once {
        #[arg(long)]
        no_remote: bool,
    },
    /// Print local store statistics.
    Stats,
    /// Test the remote replica connection.
    CheckRemote,
    /// Create the remote table and indexes.
    RemoteSetup,
    /// Push every local record to the remote replica.
    RemoteBackfill,
    /// Search local records by substring.
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = FieldArg::All)]
        field: FieldArg,
    },
    /// List senders by record count, or the records of one sender.
    Senders {
        #[arg(long)]
        sender: Option<String>,
    },
    /// List the most recent report directories.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FieldArg {
    All,
    Sender,
    Subject,
    Body,
}

impl From<FieldArg> for SearchField {
    fn from(arg: FieldArg) -> Self {
        match arg {
            FieldArg::All => SearchField::All,
            FieldArg::Sender => SearchField::Sender,
            FieldArg::Subject => SearchField::Subject,
            FieldArg::Body => SearchField::Body,
        }
    }
}

async fn open_local(config: &MonitorConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.local_db_path)
        .await
        .with_context(|| format!("opening {}", config.local_db_path.display()))
}

fn print_records(rows: &[StoredRecord]) {
    for row in rows {
        let record = &row.record;
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.id(),
            row.sent_at.as_deref().unwrap_or("-"),
            record.raw.sender,
            record.categorization.category,
            record.raw.subject
        );
    }
    println!("{} record(s)", rows.len());
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,mailswipe=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = MonitorConfig::from_env();

    match cli.command.unwrap_or(Commands::Monitor {
        interval_minutes: None,
        no_remote: false,
    }) {
        Commands::Monitor {
            interval_minutes,
            no_remote,
        } => {
            if let Some(minutes) = interval_minutes {
                config = config.with_interval_minutes(minutes);
            }
            if no_remote {
                config.remote_enabled = false;
            }

            let mut monitor = monitor_from_config(config).await?;
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("interrupt received; stopping after the current cycle"),
                        Err(err) => warn!(error = %err, "listening for ctrl-c failed; stopping"),
                    }
                    cancel.cancel();
                }
            });

            let exit = monitor.run(cancel).await.context("monitor initialization failed")?;
            println!("monitor stopped: cycles={} state={:?}", exit.cycles_started, exit.final_state);
        }
        Commands::Once { no_remote } => {
            if no_remote {
                config.remote_enabled = false;
            }
            let mut monitor = monitor_from_config(config).await?;
            let report = monitor.run_once().await?;
            println!(
                "cycle complete: run_id={} discovered={} new={} fetch_failures={} degraded={} local={}/{} remote={}",
                report.run_id,
                report.discovered,
                report.new_items,
                report.fetch_failures.len(),
                report.degraded,
                report.local.succeeded,
                report.local.total,
                report
                    .remote
                    .map(|s| format!("{}/{}", s.succeeded, s.total))
                    .unwrap_or_else(|| "disabled".to_string()),
            );
        }
        Commands::Stats => {
            let store = open_local(&config).await?;
            let stats = store.statistics().await.context("reading statistics")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::CheckRemote => {
            let Some(replica) = remote_replica(&config)? else {
                bail!("remote sync is not configured (ENABLE_REMOTE_SYNC / REMOTE_DATABASE_URL)");
            };
            if !replica.test_connection().await {
                bail!("remote replica unreachable");
            }
            println!("remote replica reachable");
        }
        Commands::RemoteSetup => {
            let Some(replica) = remote_replica(&config)? else {
                bail!("remote sync is not configured (ENABLE_REMOTE_SYNC / REMOTE_DATABASE_URL)");
            };
            replica.ensure_schema().await.context("creating remote schema")?;
            println!("remote schema ready");
        }
        Commands::RemoteBackfill => {
            let Some(replica) = remote_replica(&config)? else {
                bail!("remote sync is not configured (ENABLE_REMOTE_SYNC / REMOTE_DATABASE_URL)");
            };
            let store = open_local(&config).await?;
            let stats = backfill_remote(&store, &replica, config.remote_batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Search { query, field } => {
            let store = open_local(&config).await?;
            let rows = store.search(&query, field.into()).await.context("searching records")?;
            print_records(&rows);
        }
        Commands::Senders { sender } => {
            let store = open_local(&config).await?;
            match sender {
                Some(sender) => {
                    let rows = store.by_sender(&sender).await.context("reading sender records")?;
                    print_records(&rows);
                }
                None => {
                    for entry in store.senders().await.context("reading senders")? {
                        println!("{:>6}  {}", entry.count, entry.sender);
                    }
                }
            }
        }
        Commands::Report { runs } => {
            let Some(dir) = &config.reports_dir else {
                bail!("REPORTS_DIR is not set");
            };
            println!("{}", report_recent_markdown(runs, dir)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn every_subcommand_has_help_text() {
        let cli = Cli::command();
        for sub in cli.get_subcommands() {
            assert!(sub.get_about().is_some(), "`{}` has no help text", sub.get_name());
        }
    }

    #[test]
    fn search_and_backfill_parse() {
        let cli = Cli::try_parse_from(["mailswipe", "search", "sale", "--field", "subject"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Search { ref query, field: FieldArg::Subject }) if query == "sale"
        ));

        let cli = Cli::try_parse_from(["mailswipe", "remote-backfill"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::RemoteBackfill)));

        let cli = Cli::try_parse_from(["mailswipe", "senders", "--sender", "news@shoes.test"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Senders { sender: Some(_) })));
    }
}
