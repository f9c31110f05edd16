pub mod flush;
pub mod inspect;
pub mod serve;
pub mod stats;

use std::sync::Arc;

use spool::{FlushCoordinator, KeyLayout, RecordStore};
use spool_format_parquet::ParquetEncoder;
use spool_sink_fs::FsSink;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Буфер + encoder + sink, собранные по конфигу. Общая часть `serve` и `flush`.
pub(crate) async fn build_flusher(config: &ServerConfig) -> Result<Arc<FlushCoordinator>, ServerError> {
    let store = Arc::new(RecordStore::open(&config.buffer)?);
    let sink = FsSink::open(&config.sink.fs).await?;
    let encoder = ParquetEncoder::new(config.flush.compression);
    Ok(Arc::new(FlushCoordinator::new(
        store,
        Arc::new(encoder),
        Arc::new(sink),
        KeyLayout::new(&config.sink.prefix),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool::FlushOutcome;
    use spool_api::NewHeartbeat;

    fn config(root: &str) -> ServerConfig {
        ServerConfig::parse(&format!(
            r#"
            [buffer]
            path = "{root}/buffer/hb.db"

            [queue]
            inbox = "{root}/inbox"

            [sink]
            root = "{root}/bucket"
            prefix = "heartbeats"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn flusher_writes_parquet_under_sink_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir.path().display().to_string());

        let flusher = build_flusher(&config).await.unwrap();
        let client_time = chrono::DateTime::parse_from_rfc3339("2020-01-01T09:10:00Z").unwrap().to_utc();
        flusher.store().append(NewHeartbeat { device_id: 5, client_time }).unwrap();

        let FlushOutcome::Completed(report) = flusher.flush().await.unwrap() else {
            panic!("busy");
        };
        assert_eq!(report.uploaded(), 1);
        let object = dir.path().join("bucket").join(&report.groups[0].object_key);
        assert!(object.starts_with(dir.path().join("bucket/heartbeats/2020/01/01/09")));

        let rows = spool_format_parquet::read_heartbeats(std::fs::read(object).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, 5);
    }

    #[tokio::test]
    async fn second_flusher_on_same_buffer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir.path().display().to_string());

        let running = build_flusher(&config).await.unwrap();
        match build_flusher(&config).await {
            Err(ServerError::Store(spool::error::StoreError::Locked { .. })) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("buffer shared between two flushers"),
        }

        drop(running);
        assert!(build_flusher(&config).await.is_ok());
    }
}
