use std::sync::Arc;

use clap::Parser;
use pulsewatch::broker::amqp::AmqpConnector;
use pulsewatch::config::{NotifierConfig, read_config_file};
use pulsewatch::mailer::SmtpMailer;
use pulsewatch::notify::NotificationWorker;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace};
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
        ("pulsewatch_notifier", LevelFilter::TRACE),
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

    let config: NotifierConfig = read_config_file(&args.file)?;

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let connector = Arc::new(AmqpConnector::new(config.broker.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for the shutdown signal: {e}");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let worker = NotificationWorker::new(connector, mailer, &config.retry);
    worker.run(shutdown_rx).await?;

    info!("notifier stopped");
    Ok(())
}
