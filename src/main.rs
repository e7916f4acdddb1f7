//! `ingestor` binary: drives the pipeline from newline-delimited JSON.
//!
//! Each stdin line is one bus message, `{"topic": ..., "payload": ...}`.
//! Processed-item events are written to stdout as JSON lines.

mod cli;

use std::{error::Error, io::BufRead as _, sync::Arc, thread};

use clap::Parser;
use ingestor::{
    Backends,
    GarbageCollector,
    HealthProbe,
    IngestConfig,
    IngestWorker,
    Orchestrator,
    catalog::{CatalogStore, SqliteCatalog},
    clock::{Clock, SystemClock},
    fragment::{BusMessage, TopicFilter},
    kv::{KvStore, MemoryKv},
    object_store::{FsObjectStore, MemoryObjectStore, ObjectStore},
    publish::ChannelPublisher,
};
use log::{info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One stdin line.
#[derive(Deserialize)]
struct Envelope {
    topic: String,
    payload: serde_json::Value,
}

fn load_config(cli: &cli::Cli) -> Result<IngestConfig, ingestor::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::default(),
    };
    if let Some(bucket) = &cli.bucket {
        config.bucket.clone_from(bucket);
    }
    if let Some(dir) = &cli.object_dir {
        config.object_dir = Some(dir.clone());
    }
    if let Some(path) = &cli.catalog {
        config.catalog_path = Some(path.clone());
    }
    if let Some(url) = &cli.kv_url {
        config.kv_url = Some(url.clone());
    }
    if let Some(filter) = &cli.topic_filter {
        config.topic_filter.clone_from(filter);
    }
    for (flag, field) in [
        (cli.fragment_ttl, &mut config.fragment_ttl_secs),
        (cli.completion_ttl, &mut config.completion_ttl_secs),
        (cli.session_ttl, &mut config.session_ttl_secs),
        (cli.lock_ttl, &mut config.lock_ttl_secs),
        (cli.gc_interval, &mut config.gc_interval_secs),
    ] {
        if let Some(value) = flag {
            *field = value;
        }
    }
    config.validate()?;
    Ok(config)
}

/// Decode one stdin line into a bus message.
fn parse_line(line: &str) -> Option<BusMessage> {
    if line.trim().is_empty() {
        return None;
    }
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("skipping unparseable input line: error={e}");
            return None;
        }
    };
    let payload = match envelope.payload {
        serde_json::Value::String(raw) => raw.into_bytes(),
        other => other.to_string().into_bytes(),
    };
    Some(BusMessage::new(envelope.topic, payload))
}

/// Forward stdin lines into `tx` from a dedicated OS thread.
///
/// Blocking stdin reads cannot be cancelled, so the thread is never joined.
/// It exits at EOF, on a read error, or once the receiver is dropped.
fn spawn_stdin_reader(tx: mpsc::Sender<BusMessage>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("ingestor-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("stdin read failed: error={e}");
                        break;
                    }
                };
                if let Some(message) = parse_line(&line)
                    && tx.blocking_send(message).is_err()
                {
                    break;
                }
            }
        })
        .map(drop)
}

async fn connect_kv(config: &IngestConfig) -> Result<Arc<dyn KvStore>, Box<dyn Error>> {
    match config.kv_url.as_deref() {
        None => Ok(MemoryKv::shared()),
        #[cfg(feature = "redis")]
        Some(url) => Ok(ingestor::kv::RedisKv::shared(url).await?),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err("kv_url is set but this build lacks the `redis` feature".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = cli::Cli::parse();
    let config = load_config(&cli)?;

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("metrics exporter listening: addr={addr}");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        warn!("metrics support not compiled in; ignoring --metrics-addr");
    }

    let kv = connect_kv(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let objects: Arc<dyn ObjectStore> = match &config.object_dir {
        Some(dir) => Arc::new(FsObjectStore::new(dir)),
        None => Arc::new(MemoryObjectStore::new()),
    };
    objects.ensure_bucket(&config.bucket).await?;
    let catalog: Arc<dyn CatalogStore> = match &config.catalog_path {
        Some(path) => Arc::new(SqliteCatalog::open(path)?),
        None => Arc::new(SqliteCatalog::open_in_memory()?),
    };

    let report = HealthProbe::new(Arc::clone(&kv), Arc::clone(&objects), Arc::clone(&catalog))
        .ready()
        .await;
    if !report.is_ready() {
        return Err(format!("backends not ready: {}", serde_json::to_string(&report)?).into());
    }

    let (publisher, mut events) = ChannelPublisher::new(config.queue_capacity);
    let event_sink = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("failed to encode event: error={e}"),
            }
        }
    });

    let orchestrator = Orchestrator::new(
        &config,
        Backends {
            kv,
            clock: Arc::clone(&clock),
            objects,
            catalog,
            publisher: Some(Arc::new(publisher)),
        },
    );
    let gc = GarbageCollector::new(
        orchestrator.fragments().clone(),
        clock,
        config.fragment_ttl(),
    );
    let worker = IngestWorker::new(orchestrator)
        .with_topic_filter(TopicFilter::new(config.topic_filter.clone()))
        .with_gc(gc, config.gc_interval());

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    spawn_stdin_reader(tx)?;
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    info!(
        "ingestor started: bucket={}, topic_filter={}",
        config.bucket, config.topic_filter
    );
    worker.run(rx, shutdown.clone()).await;
    shutdown.cancel();
    event_sink.await?;
    Ok(())
}
