use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sems_collector::{
    cli::Args,
    config::{AppConfig, ArchiveConfig},
    metrics_server,
    observability,
    pipeline::{CycleOutcome, Pipeline, PointSink, Scheduler, WriteError},
    sinks::{DryRunSink, InfluxDbSink, SnapshotArchive},
    sources::SemsPortalSource,
    transform::FieldMapper,
};
use sems_model::domain::Measurement;
use tokio_util::sync::CancellationToken;

enum StoreSink {
    Influx(InfluxDbSink),
    DryRun(DryRunSink),
}

#[async_trait::async_trait]
impl PointSink for StoreSink {
    async fn write(&self, measurement: &Measurement) -> Result<(), WriteError> {
        match self {
            Self::Influx(s) => s.write(measurement).await,
            Self::DryRun(s) => s.write(measurement).await,
        }
    }
}

/// Startup checks against the store. Failures are logged; the loop still starts.
async fn prepare_store(sink: &InfluxDbSink, create_database: bool) {
    match sink.ping().await {
        Ok(()) => tracing::info!(url = %sink.base_url(), "InfluxDB reachable"),
        Err(e) => tracing::warn!(error = %e, url = %sink.base_url(), "InfluxDB ping failed"),
    }

    if create_database {
        if let Err(e) = sink.ensure_database().await {
            tracing::warn!(error = %e, "failed to create InfluxDB database");
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
        }
        _ = terminate => {}
    }

    tracing::info!("shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    observability::init_tracing(args.debug);

    let mut cfg = AppConfig::resolve(args.config.as_deref()).context("loading configuration")?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())
        .context("applying environment overrides")?;
    if let Some(dir) = &args.save_json_dir {
        cfg.archive = Some(ArchiveConfig { dir: dir.clone() });
    }
    cfg.validate()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let source = SemsPortalSource::new(
        cfg.credentials(),
        cfg.sems.login_url.clone(),
        Duration::from_secs(cfg.sems.request_timeout_secs),
        Duration::from_secs(cfg.sems.session_max_age_secs),
    )
    .context("building SEMS Portal client")?;

    let sink = if args.dry_run {
        tracing::info!("dry run: points are logged, not written");
        StoreSink::DryRun(DryRunSink::new(cfg.influxdb.measurement.clone()))
    } else {
        let sink = InfluxDbSink::new(
            cfg.influxdb.base_url(),
            cfg.influxdb.target()?,
            cfg.influxdb.measurement.clone(),
            Duration::from_secs(cfg.influxdb.request_timeout_secs),
        )
        .context("building InfluxDB client")?;
        prepare_store(&sink, cfg.influxdb.create_database).await;
        StoreSink::Influx(sink)
    };

    let mapper = FieldMapper::new(cfg.utc_offset()?, cfg.fields.clone()).context("building field mapper")?;

    let pipeline = Pipeline {
        source,
        mapper,
        sink,
        archive: cfg.archive.as_ref().map(|a| SnapshotArchive::new(a.dir.clone())),
        max_session_retries: cfg.sems.max_session_retries,
    };
    let mut scheduler = Scheduler::new(pipeline, cfg.period());

    if args.once {
        let mut session = None;
        return match scheduler.tick(&mut session).await {
            CycleOutcome::Written { .. } => Ok(()),
            CycleOutcome::Failed(e) => Err(anyhow::Error::new(e).context("cycle failed")),
        };
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    scheduler.run(shutdown).await;
    Ok(())
}
