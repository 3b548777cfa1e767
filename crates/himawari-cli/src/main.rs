use anyhow::Context;
use clap::Parser;
use himawari_core::config::{IngestConfig, StoreBackend};
use himawari_core::domain::Sector;
use himawari_core::impls::{BucketArtifactStore, FtpRemoteSource, LocalArtifactStore, PubSubNotifier};
use himawari_core::ports::{ArtifactStore, IdGenerator, SystemClock, UlidGenerator};
use himawari_core::{App, AppBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod error;
mod server;

use cli::{Cli, Commands};

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .try_init()
        .context("tracing already initialized")?;
    Ok(())
}

async fn build_app(config: Arc<IngestConfig>) -> anyhow::Result<App> {
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let store: Arc<dyn ArtifactStore> = match &config.store.backend {
        StoreBackend::Local { root } => Arc::new(
            LocalArtifactStore::init(root.clone(), ids.clone())
                .await
                .with_context(|| format!("opening store at {}", root.display()))?,
        ),
        StoreBackend::Bucket(bucket) => Arc::new(BucketArtifactStore::connect(bucket).await),
    };
    let notifier = PubSubNotifier::new(&config.notifier)?;

    let app = AppBuilder::new(config.clone())
        .remote(Arc::new(FtpRemoteSource::new(config.remote.clone())))
        .store(store)
        .notifier(Arc::new(notifier))
        .id_generator(ids)
        .build()?;
    Ok(app)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = Arc::new(IngestConfig::from_env()?);
    let app = build_app(config.clone()).await?;

    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: None,
    });

    match cmd {
        Commands::Serve { host, port } => {
            let port = port.unwrap_or(config.listen_port);
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let state = server::AppState {
                app: Arc::new(app),
                shutdown: CancellationToken::new(),
            };
            server::serve(addr, state).await?;
        }
        Commands::Ingest => {
            let report = app.ingest.run_batch().await?;
            print_json(&report)?;
        }
        Commands::Latest { sector, output } => {
            let sector = sector.map(Sector);
            let cancel = CancellationToken::new();
            let served = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    let served = app.latest.read_latest(sector, &mut file, &cancel).await?;
                    file.sync_all().await?;
                    served
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let served = app.latest.read_latest(sector, &mut stdout, &cancel).await?;
                    stdout.flush().await?;
                    served
                }
            };
            tracing::info!(name = %served.meta.name, bytes = served.bytes_copied, "latest image written");
        }
        Commands::Stats => {
            print_json(&app.catalog.summaries().await?)?;
        }
        Commands::Sweep => {
            print_json(&app.sweeper.sweep().await?)?;
        }
    }

    Ok(())
}
