mod wal;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use spool_api::{Heartbeat, NewHeartbeat, RecordId};

use crate::config::BufferConfig;
use crate::error::StoreError;
use wal::{Index, LogEntry};

// ════════════════════════════════════════════════════════════════
//  RecordStore
// ════════════════════════════════════════════════════════════════

/// Durable local buffer of heartbeats.
///
/// Append-only JSONL log plus an in-memory index by `client_time`. Every
/// write is fsynced before returning. Deletes are logged as tombstones;
/// once dead entries outnumber live ones the log is rewritten (компакция).
///
/// Все методы блокирующие и безопасны для вызова из разных задач:
/// состояние защищено внутренним mutex'ом.
///
/// Писатель один: `open` берёт эксклюзивный flock на `{path}.lock` и
/// держит его до drop. Второй процесс на том же буфере получит
/// [`StoreError::Locked`].
pub struct RecordStore {
    path: PathBuf,
    compact_min_dead: usize,
    inner: Mutex<Inner>,
    _lock: File,
}

struct Inner {
    file: File,
    index: Index,
    next_id: u64,
    log_puts: usize,
    /// Длина лога после последней успешной записи.
    len: u64,
}

/// Point-in-time buffer statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub next_id: RecordId,
}

impl RecordStore {
    /// Open or create the buffer, creating the parent directory.
    ///
    /// An open error is fatal: the process cannot run without a durable buffer.
    pub fn open(config: &BufferConfig) -> Result<Self, StoreError> {
        let path = PathBuf::from(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::open(parent, e))?;
        }
        let lock = acquire_lock(&path)?;

        let stale = wal::compact_path(&path);
        if stale.exists() {
            tracing::warn!(path = %stale.display(), "removing unfinished compaction file");
            std::fs::remove_file(&stale).map_err(|e| StoreError::open(&stale, e))?;
        }

        let state = wal::replay(&path)?;
        if state.torn_tail {
            tracing::warn!(
                path = %path.display(),
                valid_len = state.valid_len,
                "truncating torn tail of buffer log"
            );
            let f = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| StoreError::open(&path, e))?;
            f.set_len(state.valid_len).map_err(|e| StoreError::open(&path, e))?;
            f.sync_all().map_err(|e| StoreError::open(&path, e))?;
        }

        let file = open_append(&path)?;
        tracing::info!(
            path = %path.display(),
            records = state.index.len(),
            next_id = state.next_id,
            "buffer opened"
        );

        Ok(Self {
            path,
            compact_min_dead: config.compact_min_dead,
            inner: Mutex::new(Inner {
                file,
                index: state.index,
                next_id: state.next_id,
                log_puts: state.log_puts,
                len: state.valid_len,
            }),
            _lock: lock,
        })
    }

    /// Статистика буфера без открытия на запись: лог не создаётся и не
    /// обрезается, lock не берётся. Подходит для работающего рядом процесса.
    pub fn peek(config: &BufferConfig) -> Result<StoreStats, StoreError> {
        let state = wal::replay(Path::new(&config.path))?;
        Ok(StoreStats {
            records: state.index.len(),
            oldest: state.index.oldest(),
            newest: state.index.newest(),
            next_id: RecordId(state.next_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Append ──

    /// Durably append one heartbeat. Returns only after fsync.
    pub fn append(&self, record: NewHeartbeat) -> Result<RecordId, StoreError> {
        let mut inner = self.lock()?;
        // id расходуется даже при ошибке записи: строка могла частично
        // попасть на диск, повторно использовать этот id нельзя.
        let id = RecordId(inner.next_id);
        inner.next_id += 1;

        let line = LogEntry::put(id, &record).to_line()?;
        inner.write_line(&line)?;
        inner.index.insert(id, &record);
        inner.log_puts += 1;
        Ok(id)
    }

    // ── Query ──

    /// Snapshot of all records with `client_time < cutoff`, oldest first.
    /// Later appends do not affect the snapshot.
    pub fn select_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Heartbeat>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.index.before(cutoff))
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.index.len())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.lock()?;
        Ok(StoreStats {
            records: inner.index.len(),
            oldest: inner.index.oldest(),
            newest: inner.index.newest(),
            next_id: RecordId(inner.next_id),
        })
    }

    // ── Delete ──

    /// Delete records by id; unknown ids are ignored. Returns how many
    /// records were actually removed.
    pub fn delete_batch(&self, ids: &[RecordId]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;

        let mut seen = HashSet::with_capacity(ids.len());
        let present: Vec<RecordId> = ids
            .iter()
            .copied()
            .filter(|id| inner.index.contains(*id) && seen.insert(*id))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let line = LogEntry::Del { ids: present.clone() }.to_line()?;
        inner.write_line(&line)?;
        for id in &present {
            inner.index.remove(*id);
        }

        self.maybe_compact(&mut inner);
        Ok(present.len())
    }

    // ── Compaction ──

    fn maybe_compact(&self, inner: &mut Inner) {
        let live = inner.index.len();
        let dead = inner.log_puts.saturating_sub(live);
        if dead < self.compact_min_dead || dead <= live {
            return;
        }

        match self.compact(inner) {
            Ok(()) => tracing::info!(path = %self.path.display(), live, dropped = dead, "buffer log compacted"),
            Err(e) => {
                // Старый лог остаётся валидным, компакция повторится при следующем delete.
                tracing::warn!(path = %self.path.display(), error = %e, "buffer log compaction failed");
                let _ = std::fs::remove_file(wal::compact_path(&self.path));
            }
        }
    }

    fn compact(&self, inner: &mut Inner) -> Result<(), StoreError> {
        let (len, file) = wal::rewrite(&self.path, &inner.index, inner.next_id)?;
        inner.file = file;
        inner.log_puts = inner.index.len();
        inner.len = len;
        Ok(())
    }
}

/// Выполнить блокирующую операцию над буфером вне async-потоков runtime'а.
pub(crate) async fn blocking<T, F>(store: &Arc<RecordStore>, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&RecordStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(&store)).await?
}

impl Inner {
    /// Дописать строку в лог и сделать fsync. При ошибке пытается
    /// обрезать лог до последней валидной длины.
    fn write_line(&mut self, line: &[u8]) -> Result<(), StoreError> {
        let result = self
            .file
            .write_all(line)
            .and_then(|()| self.file.sync_data());
        match result {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(te) = self.file.set_len(self.len) {
                    tracing::error!(error = %te, "cannot roll back partial log write");
                }
                Err(StoreError::Io(e))
            }
        }
    }
}

/// Путь lock-файла рядом с логом.
fn lock_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".lock");
    PathBuf::from(p)
}

/// Эксклюзивный advisory lock на буфер. В файл пишется pid владельца
/// для сообщения об ошибке у следующего претендента.
fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    let lock_path = lock_path(path);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| StoreError::open(&lock_path, e))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id().to_string();
            let written = file
                .set_len(0)
                .and_then(|()| file.rewind())
                .and_then(|()| file.write_all(pid.as_bytes()));
            if let Err(e) = written {
                tracing::debug!(path = %lock_path.display(), error = %e, "cannot record lock owner");
            }
            tracing::debug!(path = %lock_path.display(), pid = %pid, "buffer lock acquired");
            Ok(file)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = match holder.trim() {
                "" => "unknown".to_string(),
                pid => pid.to_string(),
            };
            Err(StoreError::Locked {
                path: path.display().to_string(),
                holder,
            })
        }
        Err(e) => Err(StoreError::open(&lock_path, e)),
    }
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::open(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
    }

    fn hb(device_id: i64, client_time: DateTime<Utc>) -> NewHeartbeat {
        NewHeartbeat { device_id, client_time }
    }

    fn config(dir: &Path) -> BufferConfig {
        BufferConfig {
            path: dir.join("nested/heartbeats.db").display().to_string(),
            compact_min_dead: 4,
        }
    }

    #[test]
    fn open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&config(dir.path())).unwrap();
        assert!(store.path().parent().unwrap().is_dir());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&config(dir.path())).unwrap();
        let a = store.append(hb(1, at(10, 0))).unwrap();
        let b = store.append(hb(1, at(9, 0))).unwrap();
        assert!(b > a);
    }

    #[test]
    fn select_before_ignores_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&config(dir.path())).unwrap();
        for (h, m) in [(10, 2), (9, 10), (11, 0), (9, 55), (10, 59)] {
            store.append(hb(7, at(h, m))).unwrap();
        }
        let got: Vec<_> = store
            .select_before(at(10, 59))
            .unwrap()
            .iter()
            .map(|r| r.client_time)
            .collect();
        assert_eq!(got, vec![at(9, 10), at(9, 55), at(10, 2)]);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn delete_batch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&config(dir.path())).unwrap();
        let a = store.append(hb(1, at(9, 0))).unwrap();
        let b = store.append(hb(2, at(9, 1))).unwrap();

        assert_eq!(store.delete_batch(&[a, a, RecordId(999)]).unwrap(), 1);
        assert_eq!(store.delete_batch(&[a]).unwrap(), 0);
        assert_eq!(store.delete_batch(&[]).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.select_before(at(12, 0)).unwrap()[0].id, b);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let (kept, gone) = {
            let store = RecordStore::open(&cfg).unwrap();
            let gone = store.append(hb(1, at(9, 0))).unwrap();
            let kept = store.append(hb(2, at(9, 30))).unwrap();
            store.delete_batch(&[gone]).unwrap();
            (kept, gone)
        };

        let store = RecordStore::open(&cfg).unwrap();
        let rows = store.select_before(at(12, 0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, kept);
        assert_eq!(rows[0].device_id, 2);

        let next = store.append(hb(3, at(10, 0))).unwrap();
        assert!(next > kept && next > gone);
    }

    #[test]
    fn compaction_never_reuses_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let last = {
            let store = RecordStore::open(&cfg).unwrap();
            let ids: Vec<_> = (0..6).map(|i| store.append(hb(i, at(9, i as u32))).unwrap()).collect();
            let size_before = std::fs::metadata(store.path()).unwrap().len();
            assert_eq!(store.delete_batch(&ids).unwrap(), 6);
            let size_after = std::fs::metadata(store.path()).unwrap().len();
            assert!(size_after < size_before, "log should shrink after compaction");
            *ids.last().unwrap()
        };

        let store = RecordStore::open(&cfg).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.append(hb(9, at(11, 0))).unwrap() > last);
    }

    #[test]
    fn second_open_is_refused_while_first_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let first = RecordStore::open(&cfg).unwrap();
        first.append(hb(1, at(9, 0))).unwrap();

        match RecordStore::open(&cfg) {
            Err(StoreError::Locked { holder, .. }) => assert_eq!(holder, std::process::id().to_string()),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("buffer opened twice"),
        }
        // Read-only статистика доступна и при занятом lock'е.
        assert_eq!(RecordStore::peek(&cfg).unwrap().records, 1);

        let id = first.append(hb(2, at(9, 5))).unwrap();
        drop(first);

        let reopened = RecordStore::open(&cfg).unwrap();
        assert_eq!(reopened.count().unwrap(), 2);
        assert!(reopened.select_before(at(12, 0)).unwrap().iter().any(|r| r.id == id));
    }

    #[test]
    fn stats_reports_time_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&config(dir.path())).unwrap();
        store.append(hb(1, at(10, 0))).unwrap();
        store.append(hb(1, at(8, 0))).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.oldest, Some(at(8, 0)));
        assert_eq!(stats.newest, Some(at(10, 0)));
        assert_eq!(stats.next_id, RecordId(3));
    }
}
