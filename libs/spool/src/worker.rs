use std::sync::Arc;
use std::time::Duration;

use spool_api::{QueueMessage, QueueSource};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{FlushConfig, ReceiveConfig};
use crate::error::IngestError;
use crate::flush::{FlushCoordinator, FlushOutcome};
use crate::ingest::IngestAdapter;

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Основной цикл сервиса: чтение очереди → буфер, периодический flush.
///
/// Останавливается кооперативно по `CancellationToken`: между
/// сообщениями, а не посреди обработки одного.
pub struct Worker {
    queue: Arc<dyn QueueSource>,
    ingest: IngestAdapter,
    flusher: Arc<FlushCoordinator>,
    receive: ReceiveConfig,
    flush: FlushConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueSource>,
        ingest: IngestAdapter,
        flusher: Arc<FlushCoordinator>,
        receive: ReceiveConfig,
        flush: FlushConfig,
    ) -> Self {
        Self {
            queue,
            ingest,
            flusher,
            receive,
            flush,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let wait = Duration::from_secs(self.receive.wait_seconds);
        let interval = Duration::from_secs(self.flush.interval_secs);
        let mut last_flush = Instant::now();

        tracing::info!(
            max_messages = self.receive.max_messages,
            wait_secs = self.receive.wait_seconds,
            flush_interval_secs = self.flush.interval_secs,
            "worker started"
        );

        while !token.is_cancelled() {
            let received = tokio::select! {
                r = self.queue.receive(self.receive.max_messages, wait) => r,
                _ = token.cancelled() => break,
            };

            match received {
                Ok(messages) => {
                    for message in messages {
                        if token.is_cancelled() {
                            break;
                        }
                        self.process(&message).await;
                    }
                }
                Err(e) => {
                    tracing::error!(kind = %e.kind(), error = %e, "queue receive failed");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                        _ = token.cancelled() => break,
                    }
                }
            }

            if last_flush.elapsed() >= interval {
                self.run_flush().await;
                last_flush = Instant::now();
            }
        }

        if self.flush.on_shutdown {
            tracing::info!("final flush before shutdown");
            self.run_flush().await;
        }
        tracing::info!("worker stopped");
    }

    /// Один message: decode → append → ack. Ошибка до append оставляет
    /// сообщение в очереди для повторной доставки.
    async fn process(&self, message: &QueueMessage) {
        match self.ingest.handle(message).await {
            Ok(_) => {}
            Err(e @ IngestError::Decode(_)) => {
                tracing::warn!(message = %message.id, error = %e, "malformed message left in queue");
                return;
            }
            Err(e) => {
                tracing::error!(message = %message.id, error = %e, "message not buffered, left in queue");
                return;
            }
        }
        // Сбой ack после append даст дубликат при повторной доставке;
        // это допустимо для at-least-once.
        if let Err(e) = self.queue.ack(&message.ack).await {
            tracing::warn!(message = %message.id, error = %e, "ack failed, message will be redelivered");
        }
    }

    async fn run_flush(&self) {
        match self.flusher.flush().await {
            Ok(FlushOutcome::Completed(report)) if report.failed() > 0 => {
                tracing::warn!(failed = report.failed(), "flush left partitions in buffer");
            }
            Ok(FlushOutcome::Completed(_)) => {}
            Ok(FlushOutcome::Busy) => {}
            Err(e) => tracing::error!(error = %e, "flush aborted"),
        }
    }
}
