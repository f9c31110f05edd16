use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use spool::{IngestAdapter, Worker};
use spool_queue_dir::DirQueue;

use crate::config::{ConfigArgs, ServerConfig};
use crate::error::ServerError;

pub async fn run(args: ConfigArgs) -> Result<(), ServerError> {
    tracing::info!("heartbeat-spool starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Buffer, sink, encoder ---
    let flusher = super::build_flusher(&config).await?;
    let ingest = IngestAdapter::new(flusher.store().clone());

    // --- Queue ---
    let queue = Arc::new(DirQueue::open(&config.queue.dir).await?);

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let worker = Worker::new(
        queue,
        ingest,
        flusher,
        config.queue.receive.clone(),
        config.flush.schedule.clone(),
    );
    let mut handle = tokio::spawn(worker.run(token.clone()));
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            token.cancel();
            // Текущий проход выгрузки не прерывается: ждём, пока worker выйдет сам.
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        joined = &mut handle => {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker task failed");
            }
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
