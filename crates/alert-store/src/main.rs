use alert_backend::{Aggregator, ReadQuery, Registry};
use alert_store::{kafka::KafkaConsumer, Config, Controller, HealthFile, TaskState};
use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Consume alerts from Kafka and store them in a backend.
#[derive(clap::Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply if unset.
    #[arg(long, env = "ALERT_STORE_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run store tasks until signaled to stop.
    Serve,
    /// Read alerts from all query backends, printing them as JSON lines.
    Query(QueryArgs),
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Required label, as KEY=VALUE. May be repeated.
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
    /// Exclusive lower bound of alert creation time, in epoch milliseconds.
    #[arg(long, default_value_t = 0)]
    from: i64,
    /// Exclusive upper bound of alert creation time, in epoch milliseconds.
    #[arg(long, default_value_t = i64::MAX)]
    to: i64,
    /// Maximum number of alerts to read from each backend.
    #[arg(long, default_value_t = 0)]
    max_results: usize,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, not {s:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
    }

    let config = match &cli.config {
        Some(path) => Config::load(path).context("failed to load configuration")?,
        None => Config::default(),
    };
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Query(args) => query(config, args).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("starting alert-store");

    let mount = Registry::default()
        .mount(&config.backend)
        .await
        .with_context(|| format!("failed to mount backend '{}'", config.backend.name))?;

    let health = Arc::new(HealthFile::new(
        &config.health_status_file,
        config.kafka.stream_threads,
    ));
    health.set_healthy()?;

    let kafka = config.kafka.clone();
    let controller = Controller::start(&config.kafka, mount.backend.clone(), health.clone(), |id| {
        KafkaConsumer::new(&kafka, id)
    })
    .context("failed to start store tasks")?;

    let cancel = controller.cancellation_token();
    tokio::spawn(async move {
        stop_signal().await;
        tracing::info!("caught signal to stop");
        cancel.cancel();
    });

    let states = controller.join().await;
    mount.backend.close().await;

    let failed = states.iter().filter(|s| **s == TaskState::Failed).count();
    if failed != 0 {
        anyhow::bail!("{failed} of {} store tasks failed", states.len());
    }
    tracing::info!("alert-store stopped");
    Ok(())
}

async fn stop_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to listen for SIGTERM");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => (),
            _ = term.recv() => (),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn query(config: Config, args: QueryArgs) -> anyhow::Result<()> {
    let registry = Registry::default();

    let mut mounts = Vec::new();
    for backend in config.query_backends() {
        let mount = registry
            .mount(&backend)
            .await
            .with_context(|| format!("failed to mount query backend '{}'", backend.name))?;
        mounts.push(mount);
    }
    let aggregator = Aggregator::new(mounts);

    let query = ReadQuery {
        labels: args.labels.into_iter().collect(),
        from: args.from,
        to: args.to,
        max_results: args.max_results,
    };
    let result = aggregator.read(&query).await;
    aggregator.close().await;

    let alerts = result.context("failed to read alerts")?;
    tracing::info!(count = alerts.len(), "read alerts");

    let mut stdout = std::io::stdout().lock();
    for alert in alerts {
        serde_json::to_writer(&mut stdout, &alert)?;
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
