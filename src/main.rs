use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use echonet::db::{self, SettingsStore, TargetRepo};
use echonet::{Config, Daemon};

/// EchoNet - voice-activated text event router
#[derive(Parser)]
#[command(name = "echonet", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show current state settings and change history
    InspectState {
        /// Show the change log instead of current values
        #[arg(long)]
        history: bool,

        /// Filter history by setting name
        #[arg(long)]
        name: Option<String>,

        /// Max history rows
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show registered targets and their wake phrases
    InspectRegistry,
    /// Dump the target registry to JSON
    BackupRegistry {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Apply or report database migrations
    MigrateDb {
        /// Report the schema version without migrating
        #[arg(long)]
        status: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,echonet=info",
        1 => "info,echonet=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::InspectState {
                history,
                name,
                limit,
            } => inspect_state(&config, history, name.as_deref(), limit),
            Command::InspectRegistry => inspect_registry(&config),
            Command::BackupRegistry { output } => backup_registry(&config, output.as_deref()),
            Command::MigrateDb { status } => migrate_db(&config, status),
        };
    }

    tracing::info!(
        port = config.port,
        source_id = %config.source_id,
        "starting echonet"
    );

    let daemon = Daemon::new(config)?;
    daemon.run().await?;
    Ok(())
}

/// Print current settings, or the change log with `--history`
fn inspect_state(
    config: &Config,
    history: bool,
    name: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let store = SettingsStore::new(db::init(&config.db_path)?);

    if history {
        let changes = store.history(name, limit)?;
        println!("{} change(s):", changes.len());
        for c in changes {
            println!(
                "[{}] {} {} -> {} (source: {}, reason: {})",
                c.changed_at,
                c.name,
                c.old_value.as_deref().unwrap_or("-"),
                c.new_value,
                c.source.as_deref().unwrap_or("-"),
                c.reason.as_deref().unwrap_or("-"),
            );
        }
        return Ok(());
    }

    for setting in store.all_settings()? {
        println!("{} = {}  (updated {})", setting.name, setting.value, setting.updated_at);
        if let Some(description) = setting.description {
            println!("    {description}");
        }
    }
    Ok(())
}

/// Print registered targets and phrases
fn inspect_registry(config: &Config) -> anyhow::Result<()> {
    let repo = TargetRepo::new(db::init(&config.db_path)?);
    let targets = repo.list()?;

    if targets.is_empty() {
        println!("no targets registered");
        return Ok(());
    }

    for target in targets {
        println!("{} -> {}", target.name, target.listen_url());
        for phrase in target.phrases {
            println!("    \"{phrase}\"");
        }
    }
    Ok(())
}

/// Dump targets as JSON to a file or stdout
fn backup_registry(config: &Config, output: Option<&str>) -> anyhow::Result<()> {
    let repo = TargetRepo::new(db::init(&config.db_path)?);
    let targets = repo.list()?;
    let json = serde_json::to_string_pretty(&targets)?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)?;
            println!("wrote {} target(s) to {path}", targets.len());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Apply migrations, or just report the version with `--status`
fn migrate_db(config: &Config, status: bool) -> anyhow::Result<()> {
    if status {
        let pool = db::init(&config.db_path)?;
        let conn = pool.get()?;
        let version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        println!("schema version: v{version} (supported: v{})", db::SCHEMA_VERSION);
        return Ok(());
    }

    db::init(&config.db_path)?;
    println!("migrations applied; schema at v{}", db::SCHEMA_VERSION);
    Ok(())
}
