use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pdk_audit::ChainStatus;

mod commands;

#[derive(Parser)]
#[command(name = "pdk")]
#[command(about = "PromoDesk promotion back-office CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> env overlay ...)
    #[arg(long = "config", global = true, default_value = "config/base.yaml")]
    config: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Refresh a mirror from the marketplace
    Sync {
        #[command(subcommand)]
        cmd: SyncCmd,
    },

    /// Resolve stale pending enrollments of a shop
    Sweep {
        #[arg(long)]
        shop: i64,
    },

    /// Print the shop overview counters
    Stats {
        #[arg(long)]
        shop: i64,
    },

    /// Loss product commands
    Loss {
        #[command(subcommand)]
        cmd: LossCmd,
    },

    /// Operation log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SyncCmd {
    /// Catalog -> product mirror
    Products {
        #[arg(long)]
        shop: i64,
    },
    /// Campaign list -> promotion mirror
    Actions {
        #[arg(long)]
        shop: i64,
    },
}

#[derive(Subcommand)]
enum LossCmd {
    /// Exit, reprice and optionally rejoin the given loss rows
    Process {
        #[arg(long)]
        shop: i64,

        /// Loss product ids (comma separated or repeated)
        #[arg(long, required = true, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Campaign to rejoin at the new price
        #[arg(long)]
        rejoin: Option<i64>,

        /// Skip steps already recorded as complete
        #[arg(long, default_value_t = false)]
        skip_completed: bool,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of an operation log file
    Verify {
        #[arg(long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let (loaded, _) = commands::load_config(&cli.config)?;
            let secrets = pdk_config::resolve_secrets(&loaded.config_json, true)?;
            let pool = pdk_db::connect(secrets.require_database_url()?).await?;
            match cmd {
                DbCmd::Status => {
                    let s = pdk_db::status(&pool).await?;
                    println!("db_ok={} has_ledger_tables={}", s.ok, s.has_ledger_tables);
                }
                DbCmd::Migrate => {
                    pdk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pdk_config::load_layered_yaml(&path_refs)?;
            let report = pdk_config::report_unused_keys(&loaded.config_json, pdk_config::UnusedKeyPolicy::Warn)?;
            for p in &report.unused_leaf_pointers {
                eprintln!("warning: unused config key {p}");
            }
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Sync { cmd } => match cmd {
            SyncCmd::Products { shop } => commands::promo::sync_products(&cli.config, shop).await?,
            SyncCmd::Actions { shop } => commands::promo::sync_actions(&cli.config, shop).await?,
        },

        Commands::Sweep { shop } => commands::promo::sweep(&cli.config, shop).await?,

        Commands::Stats { shop } => commands::promo::stats(&cli.config, shop).await?,

        Commands::Loss { cmd } => match cmd {
            LossCmd::Process {
                shop,
                ids,
                rejoin,
                skip_completed,
            } => commands::promo::process_loss(&cli.config, shop, ids, rejoin, skip_completed).await?,
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match pdk_audit::verify_chain(&path)? {
                ChainStatus::Intact { records } => {
                    println!("chain_ok=true records={}", records);
                }
                ChainStatus::Broken { line, reason } => {
                    println!("chain_ok=false line={} reason={}", line, reason);
                    bail!("operation log chain broken at line {line}");
                }
            },
        },
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
