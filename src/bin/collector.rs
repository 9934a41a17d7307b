use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulsewatch::MonitorEntry;
use pulsewatch::broker::AlertPublisher;
use pulsewatch::broker::amqp::AmqpPublisher;
use pulsewatch::config::{CollectorConfig, StorageConfig, read_config_file};
use pulsewatch::ingest::IngestServer;
use pulsewatch::registry::ConnectionRegistry;
use pulsewatch::storage::memory::MemoryStore;
use pulsewatch::storage::sqlite::SqliteStore;
use pulsewatch::storage::{Host, HostStore, ProbeStore, RecipientDirectory};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("pulsewatch", LevelFilter::TRACE),
        ("pulsewatch_collector", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config: CollectorConfig = read_config_file(&args.file)?;

    let (hosts, probes, recipients): (
        Arc<dyn HostStore>,
        Arc<dyn ProbeStore>,
        Arc<dyn RecipientDirectory>,
    ) = match &config.storage {
        StorageConfig::Sqlite { path } => {
            let store = Arc::new(SqliteStore::open(path).await?);
            (store.clone(), store.clone(), store)
        }
        StorageConfig::None => {
            warn!("no persistent storage configured, probe history lives in memory only");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    let publisher: Arc<dyn AlertPublisher> =
        Arc::new(AmqpPublisher::connect(config.broker.clone()).await?);

    let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(
        config.write_timeout_ms,
    )));

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for the shutdown signal: {e}");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    #[cfg(unix)]
    spawn_config_push(registry.clone(), hosts.clone());

    let server = IngestServer::new(registry, hosts, probes, recipients, publisher);
    server.run(listener, shutdown_rx).await;

    info!("collector stopped");
    Ok(())
}

/// Re-send the monitor table to every connected agent on SIGHUP, so
/// host changes roll out without restarting the agents.
#[cfg(unix)]
fn spawn_config_push(registry: Arc<ConnectionRegistry>, hosts: Arc<dyn HostStore>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("cannot install the config push signal handler: {e}");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            push_monitor_config(&registry, hosts.as_ref()).await;
        }
    });
}

#[cfg(unix)]
async fn push_monitor_config(registry: &ConnectionRegistry, hosts: &dyn HostStore) {
    let hosts = match hosts.list_hosts().await {
        Ok(hosts) => hosts,
        Err(e) => {
            error!("cannot load monitor entries for the config push: {e}");
            return;
        }
    };

    let entries: Vec<MonitorEntry> = hosts.iter().map(Host::monitor_entry).collect();
    registry.broadcast(&entries).await;
    let agents = registry.connection_count().await;
    info!(agents, entries = entries.len(), "pushed monitor config");
}
