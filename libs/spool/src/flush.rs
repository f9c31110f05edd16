use std::sync::Arc;

use chrono::{DateTime, Utc};
use spool_api::{BlobSink, ColumnEncoder, Heartbeat, RecordId};
use tokio::sync::Semaphore;

use crate::error::{GroupError, StoreError};
use crate::partition::{KeyLayout, PartitionKey, partition};
use crate::store::{self, RecordStore};

// ═══════════════════════════════════════════════════════════════
//  Reports
// ═══════════════════════════════════════════════════════════════

/// Outcome of a single flush call.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Another pass is running; this call did nothing.
    Busy,
    Completed(FlushReport),
}

/// Summary of a pass: one entry per partition in the snapshot.
#[derive(Debug)]
pub struct FlushReport {
    pub cutoff: DateTime<Utc>,
    pub groups: Vec<GroupReport>,
}

#[derive(Debug)]
pub struct GroupReport {
    pub partition: PartitionKey,
    pub object_key: String,
    pub rows: usize,
    /// Records deleted from the buffer, or why the group stayed there.
    pub result: Result<usize, GroupError>,
}

impl FlushReport {
    pub fn uploaded(&self) -> usize {
        self.groups.iter().filter(|g| g.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.groups.len() - self.uploaded()
    }

    pub fn deleted(&self) -> usize {
        self.groups
            .iter()
            .filter_map(|g| g.result.as_ref().ok())
            .sum()
    }
}

// ═══════════════════════════════════════════════════════════════
//  FlushCoordinator
// ═══════════════════════════════════════════════════════════════

/// Buffer consolidation: snapshot of records older than the cutoff →
/// hourly partitions → columnar file → sink → delete from buffer.
///
/// At most one pass runs at a time; a concurrent call returns
/// [`FlushOutcome::Busy`] immediately (без ожидания).
pub struct FlushCoordinator {
    store: Arc<RecordStore>,
    encoder: Arc<dyn ColumnEncoder>,
    sink: Arc<dyn BlobSink>,
    layout: KeyLayout,
    gate: Semaphore,
}

impl FlushCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        encoder: Arc<dyn ColumnEncoder>,
        sink: Arc<dyn BlobSink>,
        layout: KeyLayout,
    ) -> Self {
        Self {
            store,
            encoder,
            sink,
            layout,
            gate: Semaphore::new(1),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Pass with the cutoff taken from the current time.
    pub async fn flush(&self) -> Result<FlushOutcome, StoreError> {
        self.flush_with(Utc::now).await
    }

    /// Pass with an explicit cutoff: uploads records with `client_time < cutoff`.
    pub async fn flush_at(&self, cutoff: DateTime<Utc>) -> Result<FlushOutcome, StoreError> {
        self.flush_with(|| cutoff).await
    }

    async fn flush_with(&self, cutoff: impl FnOnce() -> DateTime<Utc>) -> Result<FlushOutcome, StoreError> {
        let Ok(_permit) = self.gate.try_acquire() else {
            tracing::info!("flush already running, skipped");
            return Ok(FlushOutcome::Busy);
        };

        // Отсечка фиксируется один раз, после захвата: весь проход видит
        // один и тот же снимок независимо от длительности выгрузки.
        let cutoff = cutoff();
        let snapshot = store::blocking(&self.store, move |s| s.select_before(cutoff)).await?;
        if snapshot.is_empty() {
            tracing::debug!(%cutoff, "nothing to flush");
            return Ok(FlushOutcome::Completed(FlushReport { cutoff, groups: Vec::new() }));
        }

        let total = snapshot.len();
        let groups = partition(snapshot, PartitionKey::hourly);
        tracing::info!(%cutoff, records = total, partitions = groups.len(), "flush started");

        let mut reports = Vec::with_capacity(groups.len());
        for (key, rows) in groups {
            reports.push(self.flush_group(key, rows).await);
        }

        let report = FlushReport { cutoff, groups: reports };
        tracing::info!(
            %cutoff,
            uploaded = report.uploaded(),
            failed = report.failed(),
            deleted = report.deleted(),
            "flush finished"
        );
        Ok(FlushOutcome::Completed(report))
    }

    /// encode → put → delete. Любая ошибка оставляет группу в буфере.
    async fn flush_group(&self, partition: PartitionKey, rows: Vec<Heartbeat>) -> GroupReport {
        let object_key = self.layout.object_key(&partition, &rows, self.encoder.extension());
        let count = rows.len();
        let result = self.upload_group(&object_key, rows).await;

        match &result {
            Ok(deleted) => tracing::info!(
                partition = %partition,
                key = %object_key,
                rows = count,
                deleted,
                "partition uploaded"
            ),
            Err(e) => tracing::error!(
                partition = %partition,
                key = %object_key,
                rows = count,
                transient = e.is_transient(),
                error = %e,
                "partition flush failed, records kept"
            ),
        }

        GroupReport {
            partition,
            object_key,
            rows: count,
            result,
        }
    }

    async fn upload_group(&self, key: &str, rows: Vec<Heartbeat>) -> Result<usize, GroupError> {
        let body = self.encoder.encode(&rows).map_err(GroupError::Encode)?;
        self.sink
            .put(key, body)
            .await
            .map_err(|source| GroupError::Upload { key: key.to_string(), source })?;

        let ids: Vec<RecordId> = rows.iter().map(|r| r.id).collect();
        store::blocking(&self.store, move |s| s.delete_batch(&ids))
            .await
            .map_err(GroupError::Delete)
    }
}
