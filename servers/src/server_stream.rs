use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_stream::configs::{StreamConfig, StreamSession};
use lib_stream::connections::{PostgresSink, Sink, StdoutSink};
use lib_stream::core::{IngestionPipeline, PendingQueue, PipelineError, PipelineOptions, PipelineReport};
use lib_stream::ingestors::{FirehoseStream, ReqwestTransport, StreamClient};
use lib_stream::normalize::Normalizer;

mod stream_logic;
use stream_logic::config::SinkKind;
use stream_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(config.log_dir(), config.log_level())?;

    let mut stream_config = StreamConfig::load(config.config_path())
        .with_context(|| format!("loading {}", config.config_path().display()))?;
    if let Some(url) = &config.stream_url {
        stream_config.stream.url = Some(url.clone());
    }
    let session = stream_config.session().context("invalid stream configuration")?;
    // Fails here, before connecting, for a publisher without a profile.
    let normalizer = Normalizer::new(&session)?;
    log::info!(
        "Starting {} {} stream '{}' for account {} ({})",
        session.publisher,
        session.stream_type,
        session.stream_label,
        session.account_name,
        session.url
    );

    let shutdown = CancellationToken::new();
    let stream = build_stream(&session, &stream_config, shutdown.clone())?;
    let queue = Arc::new(stream_config.pipeline.pending_queue());
    let options = PipelineOptions::from(&stream_config.pipeline);

    tokio::spawn(cancel_on_signal(shutdown));

    let result = match config.sink_kind(stream_config.database.is_some()) {
        SinkKind::Stdout => {
            log::info!("Writing records to stdout");
            run_pipeline(stream, normalizer, Arc::new(StdoutSink::stdout()), queue, options).await
        }
        SinkKind::Postgres => {
            let database = stream_config
                .database
                .as_ref()
                .context("--sink postgres requires a database section in the config")?;
            let sink = PostgresSink::new(database)?;
            sink.ping()
                .await
                .with_context(|| format!("database {}:{} is unreachable", database.host, database.port))?;
            sink.ensure_schema().await?;
            run_pipeline(stream, normalizer, Arc::new(sink), queue, options).await
        }
    };

    match result {
        Ok(report) => {
            log::info!("Shutdown complete. {} of {} records persisted.", report.persisted, report.received);
            Ok(())
        }
        Err(e) => {
            log::error!("FATAL: {}", e);
            Err(e.into())
        }
    }
}

fn build_stream(
    session: &StreamSession,
    stream_config: &StreamConfig,
    shutdown: CancellationToken,
) -> Result<FirehoseStream<ReqwestTransport>> {
    let request = session.stream_request();
    let transport = ReqwestTransport::new(&request)?;
    let client = StreamClient::new(transport, request, session.framing(), shutdown);
    Ok(FirehoseStream::new(client, stream_config.reconnect.retry_budget()))
}

async fn run_pipeline<S: Sink + 'static>(
    stream: FirehoseStream<ReqwestTransport>,
    normalizer: Normalizer,
    sink: Arc<S>,
    queue: Arc<PendingQueue>,
    options: PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    IngestionPipeline::new(stream, normalizer, sink, queue, options).run().await
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-UNIX systems, `terminate` is a future that never completes.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => log::info!("SIGTERM received, initiating shutdown."),
    }
    shutdown.cancel();
}
