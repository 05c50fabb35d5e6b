use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use showtime_sync::api::ApiServer;
use showtime_sync::chunk::BatchSize;
use showtime_sync::config::{self, AppConfig};
use showtime_sync::logging;
use showtime_sync::reconcile::Reconciler;
use showtime_sync::source::{SourceConfig, DEFAULT_SOURCE_URL};
use showtime_sync::store::{self, PgStore};
use showtime_sync::sync::SyncService;
use showtime_sync::util::env as env_util;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "showtime", version, about = "Cinema showtime staging, reconcile and query service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Rows per transaction for staging and reconcile (overrides SYNC_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<BatchSize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (and the scheduled sync when SYNC_INTERVAL_SECS is set)
    Serve(ServeArgs),
    /// Stage the current snapshot, then reconcile it into canonical shows
    Sync(SourceArgs),
    /// Only load the snapshot into the staging table
    Stage(SourceArgs),
    /// Only reconcile the staging table into canonical shows
    Reconcile,
    /// Apply pending SQL migrations
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Default, Args)]
struct SourceArgs {
    /// Where to read the snapshot from (overrides SHOW_SOURCE)
    #[arg(long, value_enum)]
    source: Option<SourceKind>,
    /// Snapshot file for `--source file`
    #[arg(long)]
    path: Option<PathBuf>,
    /// Endpoint for `--source http`
    #[arg(long)]
    url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    File,
    Http,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Directory holding NNNN_name.sql files (overrides MIGRATIONS_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,
}

impl SourceArgs {
    /// Apply command-line overrides on top of the configured source.
    fn resolve(&self, configured: SourceConfig) -> SourceConfig {
        let timeout = match &configured {
            SourceConfig::Http { timeout, .. } => *timeout,
            SourceConfig::File { .. } => std::time::Duration::from_secs(30),
        };
        let kind = self.source.unwrap_or(match configured {
            SourceConfig::Http { .. } => SourceKind::Http,
            SourceConfig::File { .. } => SourceKind::File,
        });
        match (kind, configured) {
            (SourceKind::File, SourceConfig::File { path }) => SourceConfig::File {
                path: self.path.clone().unwrap_or(path),
            },
            (SourceKind::File, SourceConfig::Http { .. }) => SourceConfig::File {
                path: self
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(showtime_sync::source::DEFAULT_SNAPSHOT_PATH)),
            },
            (SourceKind::Http, SourceConfig::Http { url, .. }) => SourceConfig::Http {
                url: self.url.clone().unwrap_or(url),
                timeout,
            },
            (SourceKind::Http, SourceConfig::File { .. }) => SourceConfig::Http {
                url: self
                    .url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                timeout,
            },
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    // `.env` may carry RUST_LOG, so load it before the subscriber reads the filter.
    env_util::init_env();
    logging::init_tracing(logging::DEFAULT_FILTER)?;
    let cli = Cli::parse();

    env_util::log_config_snapshot("showtime", config::SNAPSHOT_KEYS);
    let mut cfg = AppConfig::from_env().context("invalid configuration")?;
    if let Some(size) = cli.batch_size {
        cfg.sync.batch_size = size;
    }

    if let Err(e) = run(cli.command, cfg).await {
        error!(error = %format!("{e:#}"), "showtime command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, mut cfg: AppConfig) -> Result<()> {
    if let Command::Migrate(args) = &command {
        return migrate(&cfg, args.dir.clone()).await;
    }

    let store = store::connect(&cfg.store)
        .await
        .context("failed to open show store")?;
    info!(backend = store.backend(), "show store ready");

    let outcome = match command {
        Command::Serve(args) => {
            if let Some(host) = args.host {
                cfg.server.host = host;
            }
            if let Some(port) = args.port {
                cfg.server.port = port;
            }
            let source = cfg.sync.source.build()?;
            let service = Arc::new(SyncService::new(store.clone(), source, cfg.sync.batch_size));
            ApiServer::new(cfg.server)
                .with_schedule(cfg.sync.interval)
                .run(store.clone(), service)
                .await
        }
        Command::Sync(args) => {
            let source = args.resolve(cfg.sync.source).build()?;
            let service = SyncService::new(store.clone(), source, cfg.sync.batch_size);
            service
                .run()
                .await
                .map(|report| info!(?report, "sync finished"))
                .map_err(anyhow::Error::from)
        }
        Command::Stage(args) => {
            let source = args.resolve(cfg.sync.source).build()?;
            let service = SyncService::new(store.clone(), source, cfg.sync.batch_size);
            service
                .stage_only()
                .await
                .map(|report| info!(?report, "staging finished"))
                .map_err(anyhow::Error::from)
        }
        Command::Reconcile => Reconciler::new(store.clone(), cfg.sync.batch_size)
            .run()
            .await
            .map(|report| info!(?report, "reconcile finished"))
            .map_err(anyhow::Error::from),
        Command::Migrate(_) => Ok(()),
    };

    store.close().await;
    outcome
}

async fn migrate(cfg: &AppConfig, dir: Option<PathBuf>) -> Result<()> {
    let url = cfg.store.database_url.trim();
    if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
        bail!("migrate needs a postgres DATABASE_URL");
    }
    let mut store_cfg = cfg.store.clone();
    store_cfg.auto_migrate = false;
    let dir = dir.unwrap_or_else(|| store_cfg.migrations_dir.clone());

    let store = PgStore::connect(&store_cfg)
        .await
        .context("failed to connect for migrations")?;
    let applied = store.run_migrations(&dir).await;
    store.pool.close().await;
    let applied = applied.with_context(|| format!("migrations in {} failed", dir.display()))?;
    info!(applied, dir = %dir.display(), "migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cli_parses_subcommands_and_global_batch_size() {
        let cli = Cli::try_parse_from(["showtime", "sync", "--source", "http", "--batch-size", "25"])
            .unwrap();
        assert_eq!(cli.batch_size, BatchSize::new(25));
        match cli.command {
            Command::Sync(args) => assert_eq!(args.source, Some(SourceKind::Http)),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["showtime", "reconcile", "--batch-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["showtime", "reconcile", "--batch-size", "6000"]).is_err());
    }

    #[test]
    fn source_override_switches_kind() {
        let configured = SourceConfig::File {
            path: PathBuf::from("./data/allShows.json"),
        };
        let args = SourceArgs {
            source: Some(SourceKind::Http),
            url: Some("http://localhost:8080/all-shows".into()),
            ..SourceArgs::default()
        };
        assert_eq!(
            args.resolve(configured),
            SourceConfig::Http {
                url: "http://localhost:8080/all-shows".into(),
                timeout: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn path_override_keeps_file_source() {
        let configured = SourceConfig::File {
            path: PathBuf::from("./data/allShows.json"),
        };
        let args = SourceArgs {
            path: Some(PathBuf::from("/tmp/shows.json")),
            ..SourceArgs::default()
        };
        assert_eq!(
            args.resolve(configured),
            SourceConfig::File {
                path: PathBuf::from("/tmp/shows.json")
            }
        );
    }
}
