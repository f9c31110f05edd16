use std::sync::Arc;

use arrow::array::{Array, Int64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use spool_api::{ColumnEncoder, Heartbeat, PluginError};

pub const DEVICE_ID: &str = "device_id";
pub const HEARTBEAT_TIME: &str = "heartbeat_time";

// ═══════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════

/// Column compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Zstd,
}

impl Compression {
    fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ParquetEncoder
// ═══════════════════════════════════════════════════════════════

/// Encodes one heartbeat group as a Parquet file.
///
/// Schema: `device_id: Int64` and `heartbeat_time: Timestamp(µs, UTC)`,
/// both non-null. One row group per file.
pub struct ParquetEncoder {
    schema: Arc<Schema>,
    compression: Compression,
}

impl ParquetEncoder {
    pub fn new(compression: Compression) -> Self {
        Self {
            schema: schema(),
            compression,
        }
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_created_by(concat!("heartbeat-spool ", env!("CARGO_PKG_VERSION")).to_string())
            .build()
    }
}

impl Default for ParquetEncoder {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(DEVICE_ID, DataType::Int64, false),
        Field::new(
            HEARTBEAT_TIME,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
    ]))
}

impl ColumnEncoder for ParquetEncoder {
    fn encode(&self, rows: &[Heartbeat]) -> Result<Vec<u8>, PluginError> {
        if rows.is_empty() {
            return Err(PluginError::invalid_data("refusing to encode empty group"));
        }

        let device_ids = Int64Array::from_iter_values(rows.iter().map(|r| r.device_id));
        let times = TimestampMicrosecondArray::from_iter_values(rows.iter().map(|r| r.client_time.timestamp_micros()))
            .with_timezone("UTC");
        let batch = RecordBatch::try_new(self.schema.clone(), vec![Arc::new(device_ids), Arc::new(times)])
            .map_err(|e| PluginError::invalid_data(format!("record batch: {e}")))?;

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, self.schema.clone(), Some(self.properties()))
            .map_err(|e| PluginError::invalid_data(format!("parquet writer init: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| PluginError::invalid_data(format!("parquet write: {e}")))?;
        writer
            .close()
            .map_err(|e| PluginError::invalid_data(format!("parquet close: {e}")))?;
        Ok(buf)
    }

    fn extension(&self) -> &str {
        "parquet"
    }
}

// ═══════════════════════════════════════════════════════════════
//  Reader
// ═══════════════════════════════════════════════════════════════

/// A row of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRow {
    pub device_id: i64,
    pub heartbeat_time: DateTime<Utc>,
}

/// Read a file written by [`ParquetEncoder`]. Used by the `inspect` command
/// and tests.
pub fn read_heartbeats(data: Vec<u8>) -> Result<Vec<HeartbeatRow>, PluginError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(data))
        .map_err(|e| PluginError::invalid_data(format!("parquet reader init: {e}")))?
        .build()
        .map_err(|e| PluginError::invalid_data(format!("parquet reader build: {e}")))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| PluginError::invalid_data(format!("parquet read batch: {e}")))?;
        let ids = column::<Int64Array>(&batch, DEVICE_ID)?;
        let times = column::<TimestampMicrosecondArray>(&batch, HEARTBEAT_TIME)?;
        for i in 0..batch.num_rows() {
            let micros = times.value(i);
            let heartbeat_time = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| PluginError::invalid_data(format!("timestamp out of range: {micros}")))?;
            rows.push(HeartbeatRow {
                device_id: ids.value(i),
                heartbeat_time,
            });
        }
    }
    Ok(rows)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, PluginError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PluginError::invalid_data(format!("missing column {name}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PluginError::invalid_data(format!("unexpected type of column {name}")))
}
