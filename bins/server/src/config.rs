use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use spool::config::{BufferConfig, FlushConfig, ReceiveConfig};
use spool_format_parquet::Compression;
use spool_queue_dir::DirQueueConfig;
use spool_sink_fs::FsSinkConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "heartbeat-spool", about = "Буфер heartbeat'ов: очередь → локальный лог → почасовые Parquet-файлы")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Читать очередь и периодически выгружать буфер
    Serve(ConfigArgs),
    /// Выполнить один проход выгрузки и выйти
    Flush(ConfigArgs),
    /// Показать состояние буфера
    Stats(ConfigArgs),
    /// Распечатать строки выгруженного Parquet-файла
    Inspect(InspectArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "SPOOL_CONFIG")]
    pub config: String,
}

#[derive(Args, Clone, Debug)]
pub struct InspectArgs {
    /// Parquet-файл
    pub file: PathBuf,
    /// Вывести не больше N строк
    #[arg(long)]
    pub limit: Option<usize>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    pub queue: QueueSection,
    pub sink: SinkSection,
    #[serde(default)]
    pub flush: FlushSection,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    #[serde(flatten)]
    pub dir: DirQueueConfig,
    #[serde(flatten)]
    pub receive: ReceiveConfig,
}

#[derive(Debug, Deserialize)]
pub struct SinkSection {
    #[serde(flatten)]
    pub fs: FsSinkConfig,
    /// Префикс ключей объектов, e.g. "heartbeats".
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlushSection {
    #[serde(flatten)]
    pub schedule: FlushConfig,
    #[serde(default)]
    pub compression: Compression,
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config { context, detail: format!("'{path}': {detail}") },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config { context: "parse", detail: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = ServerConfig::parse(
            r#"
            [queue]
            inbox = "/var/spool/heartbeats"

            [sink]
            root = "/mnt/bucket"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.buffer.path, "data/heartbeats.db");
        assert_eq!(cfg.queue.dir.extension, "json");
        assert_eq!(cfg.queue.dir.max_receive_count, None);
        assert_eq!(cfg.queue.receive.max_messages, 10);
        assert_eq!(cfg.queue.receive.wait_seconds, 20);
        assert_eq!(cfg.sink.prefix, "");
        assert_eq!(cfg.flush.schedule.interval_secs, 3600);
        assert!(!cfg.flush.schedule.on_shutdown);
        assert_eq!(cfg.flush.compression, Compression::Snappy);
    }

    #[test]
    fn full_config() {
        let cfg = ServerConfig::parse(
            r#"
            [buffer]
            path = "/var/lib/spool/hb.db"
            compact_min_dead = 10

            [queue]
            inbox = "in"
            max_messages = 50
            wait_seconds = 5
            visibility_timeout_secs = 120
            max_receive_count = 5

            [sink]
            root = "out"
            prefix = "heartbeats"

            [flush]
            interval_secs = 600
            compression = "zstd"
            on_shutdown = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.buffer.compact_min_dead, 10);
        assert_eq!(cfg.queue.receive.max_messages, 50);
        assert_eq!(cfg.queue.dir.visibility_timeout_secs, 120);
        assert_eq!(cfg.queue.dir.max_receive_count, Some(5));
        assert_eq!(cfg.sink.fs.root, "out");
        assert_eq!(cfg.sink.prefix, "heartbeats");
        assert_eq!(cfg.flush.schedule.interval_secs, 600);
        assert!(cfg.flush.schedule.on_shutdown);
        assert_eq!(cfg.flush.compression, Compression::Zstd);
    }

    #[test]
    fn missing_required_fields_are_config_errors() {
        let err = ServerConfig::parse("[queue]\ninbox = \"in\"\n").unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "parse", .. }));
        let err = ServerConfig::parse("[queue]\n[sink]\nroot = \"out\"\n").unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "parse", .. }));
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ServerConfig::load(&path.display().to_string()).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "read", .. }));
    }
}
