use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use spool_api::{Heartbeat, NewHeartbeat, RecordId};

use crate::error::StoreError;

// ════════════════════════════════════════════════════════════════
//  On-disk log format
// ════════════════════════════════════════════════════════════════

/// Одна строка JSONL-лога буфера.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum LogEntry {
    /// Заголовок компактированного лога: первый свободный id.
    Seq { next_id: RecordId },
    Put(DiskRecord),
    Del { ids: Vec<RecordId> },
}

/// Запись на диске: `id`, `endpointId`, `clientTime`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DiskRecord {
    pub id: RecordId,
    pub endpoint_id: i64,
    pub client_time: DateTime<Utc>,
}

impl LogEntry {
    pub(super) fn put(id: RecordId, record: &NewHeartbeat) -> Self {
        LogEntry::Put(DiskRecord {
            id,
            endpoint_id: record.device_id,
            client_time: record.client_time,
        })
    }

    /// Сериализовать в строку лога с завершающим `\n`.
    pub(super) fn to_line(&self) -> Result<Vec<u8>, StoreError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

// ════════════════════════════════════════════════════════════════
//  Index
// ════════════════════════════════════════════════════════════════

/// In-memory индекс живых записей: по `(client_time, id)` для range-выборки
/// и по `id` для удаления.
#[derive(Default)]
pub(super) struct Index {
    by_time: BTreeMap<(DateTime<Utc>, RecordId), i64>,
    by_id: HashMap<RecordId, DateTime<Utc>>,
}

impl Index {
    pub(super) fn insert(&mut self, id: RecordId, record: &NewHeartbeat) {
        if let Some(prev) = self.by_id.insert(id, record.client_time) {
            self.by_time.remove(&(prev, id));
        }
        self.by_time.insert((record.client_time, id), record.device_id);
    }

    pub(super) fn remove(&mut self, id: RecordId) -> bool {
        match self.by_id.remove(&id) {
            Some(t) => {
                self.by_time.remove(&(t, id));
                true
            }
            None => false,
        }
    }

    pub(super) fn contains(&self, id: RecordId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Все записи с `client_time < cutoff`, по возрастанию времени.
    pub(super) fn before(&self, cutoff: DateTime<Utc>) -> Vec<Heartbeat> {
        self.by_time
            .range(..(cutoff, RecordId::MIN))
            .map(|(&(client_time, id), &device_id)| Heartbeat { id, device_id, client_time })
            .collect()
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = Heartbeat> + '_ {
        self.by_time
            .iter()
            .map(|(&(client_time, id), &device_id)| Heartbeat { id, device_id, client_time })
    }

    pub(super) fn oldest(&self) -> Option<DateTime<Utc>> {
        self.by_time.keys().next().map(|(t, _)| *t)
    }

    pub(super) fn newest(&self) -> Option<DateTime<Utc>> {
        self.by_time.keys().next_back().map(|(t, _)| *t)
    }
}

// ════════════════════════════════════════════════════════════════
//  Replay
// ════════════════════════════════════════════════════════════════

/// Состояние, восстановленное из лога при открытии.
pub(super) struct Replay {
    pub index: Index,
    pub next_id: u64,
    /// Количество `put` строк в логе (живых и удалённых).
    pub log_puts: usize,
    /// Длина валидного префикса лога в байтах.
    pub valid_len: u64,
    /// Был ли отрезан недописанный хвост.
    pub torn_tail: bool,
}

/// Прочитать лог и восстановить индекс.
///
/// Читается не больше длины файла на момент открытия.
///
/// Последняя строка без `\n`: недописанная запись (сбой посреди append):
/// она отбрасывается, `valid_len` указывает, где обрезать файл.
/// Битая строка в середине лога: фатальная ошибка.
pub(super) fn replay(path: &Path) -> Result<Replay, StoreError> {
    let mut state = Replay {
        index: Index::default(),
        next_id: 1,
        log_puts: 0,
        valid_len: 0,
        torn_tail: false,
    };

    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(StoreError::open(path, e)),
    };
    let len = f.metadata().map_err(|e| StoreError::open(path, e))?.len();
    let mut reader = BufReader::new(f.take(len));
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| StoreError::open(path, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;

        if buf.last() != Some(&b'\n') {
            state.torn_tail = true;
            break;
        }

        let line = &buf[..buf.len() - 1];
        if line.iter().all(u8::is_ascii_whitespace) {
            state.valid_len += n as u64;
            continue;
        }

        let entry: LogEntry = serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            line: line_no,
            detail: e.to_string(),
        })?;
        apply(&mut state, entry);
        state.valid_len += n as u64;
    }

    Ok(state)
}

fn apply(state: &mut Replay, entry: LogEntry) {
    match entry {
        LogEntry::Seq { next_id } => {
            state.next_id = state.next_id.max(next_id.get());
        }
        LogEntry::Put(rec) => {
            let record = NewHeartbeat {
                device_id: rec.endpoint_id,
                client_time: rec.client_time,
            };
            state.index.insert(rec.id, &record);
            state.next_id = state.next_id.max(rec.id.get() + 1);
            state.log_puts += 1;
        }
        LogEntry::Del { ids } => {
            for id in ids {
                state.index.remove(id);
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Compaction
// ════════════════════════════════════════════════════════════════

/// Путь временного файла компакции рядом с логом.
pub(super) fn compact_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".compact");
    PathBuf::from(p)
}

/// Переписать лог: заголовок `seq` + только живые записи.
///
/// Пишет во временный файл, fsync, затем атомарный rename поверх лога.
/// Возвращает длину нового лога и append-handle на него, открытый до
/// rename: запись никогда не уйдёт в отвязанный inode старого лога.
pub(super) fn rewrite(path: &Path, index: &Index, next_id: u64) -> Result<(u64, File), StoreError> {
    let tmp = compact_path(path);
    let mut len = 0u64;
    {
        let f = File::create(&tmp)?;
        let mut w = std::io::BufWriter::new(f);
        let header = LogEntry::Seq { next_id: RecordId(next_id) }.to_line()?;
        w.write_all(&header)?;
        len += header.len() as u64;
        for hb in index.iter() {
            let record = NewHeartbeat {
                device_id: hb.device_id,
                client_time: hb.client_time,
            };
            let line = LogEntry::put(hb.id, &record).to_line()?;
            w.write_all(&line)?;
            len += line.len() as u64;
        }
        let f = w.into_inner().map_err(|e| e.into_error())?;
        f.sync_all()?;
    }
    let handle = std::fs::OpenOptions::new().append(true).open(&tmp)?;
    std::fs::rename(&tmp, path)?;
    sync_parent(path);
    Ok((len, handle))
}

/// fsync директории, чтобы rename пережил сбой питания.
pub(super) fn sync_parent(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %parent.display(), error = %e, "directory fsync skipped");
    }
}
