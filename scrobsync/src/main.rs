//! scrobsync - listen history daemon
//!
//! `serve` runs the periodic ListenBrainz backfill until Ctrl-C. The other
//! subcommands run one operation against the database and exit.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scrobsync::db::users;
use scrobsync::models::{Range, StatsEntity, StatsFilter, StatsMetric};
use scrobsync::services::{ListenBrainzClient, ScrobblingService};
use scrobsync::EngineSettings;
use scrobsync_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use scrobsync_common::db::{init_database, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scrobsync", version, about = "Listen history and ListenBrainz sync")]
struct Cli {
    /// Folder holding the database
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, env = "SCROBSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the background synchronizer until interrupted
    Serve,
    /// Import a user's ListenBrainz history once
    Import { login: String },
    /// Show ranked artists, releases or tracks of a user
    Stats {
        login: String,
        kind: StatsKind,
        #[arg(long, default_value_t = 10)]
        count: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Show a user's most recent listens
    Listens {
        login: String,
        #[arg(long, default_value_t = 20)]
        count: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatsKind {
    TopArtists,
    TopReleases,
    TopTracks,
    RecentArtists,
    RecentReleases,
    RecentTracks,
}

impl StatsKind {
    fn query(self) -> (StatsEntity, StatsMetric) {
        match self {
            StatsKind::TopArtists => (StatsEntity::Artist, StatsMetric::ListenCount),
            StatsKind::TopReleases => (StatsEntity::Release, StatsMetric::ListenCount),
            StatsKind::TopTracks => (StatsEntity::Track, StatsMetric::ListenCount),
            StatsKind::RecentArtists => (StatsEntity::Artist, StatsMetric::LastListened),
            StatsKind::RecentReleases => (StatsEntity::Release, StatsMetric::LastListened),
            StatsKind::RecentTracks => (StatsEntity::Track, StatsMetric::LastListened),
        }
    }
}

fn load_config(cli: &Cli) -> Result<TomlConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_toml_config(&path)?,
        None => TomlConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

async fn user_id(service: &ScrobblingService, login: &str) -> Result<UserId> {
    users::find_user_by_login(service.pool(), login)
        .await?
        .map(|user| user.id)
        .ok_or_else(|| anyhow!("Unknown user: {}", login))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config)?;

    info!("Starting scrobsync {}", env!("CARGO_PKG_VERSION"));

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(cli.root_folder.clone())
        .with_toml_config(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path).await?;

    let settings = EngineSettings::from_toml(&config);
    let client = ListenBrainzClient::new(settings.client.clone())?;
    let service = ScrobblingService::new(pool, Arc::new(client), &settings);

    match cli.command {
        Command::Serve => {
            service.start();
            info!("Synchronizer running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
        Command::Import { login } => {
            let user = user_id(&service, &login).await?;
            let outcome = service.import_listens(user).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Stats {
            login,
            kind,
            count,
            offset,
        } => {
            let user = user_id(&service, &login).await?;
            let (entity, metric) = kind.query();
            let page = service
                .stats(user, entity, metric, &StatsFilter::default(), Range::new(offset, count))
                .await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Listens {
            login,
            count,
            offset,
        } => {
            let user = user_id(&service, &login).await?;
            let page = service.listens(user, Range::new(offset, count)).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
    }

    service.shutdown().await;
    Ok(())
}
