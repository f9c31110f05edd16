use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use spool_api::Heartbeat;

// ═══════════════════════════════════════════════════════════════
//  PartitionKey
// ═══════════════════════════════════════════════════════════════

/// Часовой бакет: `(year, month, day, hour)` по `client_time` записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl PartitionKey {
    /// Календарный час UTC, которому принадлежит `t`.
    pub fn hourly(t: &DateTime<Utc>) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
            day: t.day(),
            hour: t.hour(),
        }
    }

    /// Компактная метка бакета: `yyyyMMddHH`.
    pub fn stamp(&self) -> String {
        format!("{:04}{:02}{:02}{:02}", self.year, self.month, self.day, self.hour)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}/{:02}/{:02}/{:02}", self.year, self.month, self.day, self.hour)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Partitioner
// ═══════════════════════════════════════════════════════════════

/// Разбить снимок на непересекающиеся группы по ключу от `client_time`.
///
/// Каждая запись попадает ровно в одну группу; пустых групп не бывает.
/// Порядок записей внутри группы сохраняется.
pub fn partition<F>(records: Vec<Heartbeat>, key_fn: F) -> BTreeMap<PartitionKey, Vec<Heartbeat>>
where
    F: Fn(&DateTime<Utc>) -> PartitionKey,
{
    let mut groups: BTreeMap<PartitionKey, Vec<Heartbeat>> = BTreeMap::new();
    for record in records {
        groups.entry(key_fn(&record.client_time)).or_default().push(record);
    }
    groups
}

// ═══════════════════════════════════════════════════════════════
//  Object keys
// ═══════════════════════════════════════════════════════════════

/// Раскладка ключей объектов в sink'е:
/// `[{prefix}/]{yyyy}/{MM}/{dd}/{HH}/heartbeats_{yyyyMMddHH}_{suffix}.{ext}`.
///
/// Суффикс: минимальный id в группе. Id не переиспользуются, поэтому:
/// повтор той же группы (сбой между upload и delete) даёт тот же ключ и
/// перезаписывает объект; группа того же часа из более поздних записей
/// получает новый ключ и не затирает уже выгруженные данные.
#[derive(Debug, Clone, Default)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn object_key(&self, partition: &PartitionKey, group: &[Heartbeat], extension: &str) -> String {
        let suffix = group.iter().map(|r| r.id.get()).min().unwrap_or(0);
        let key = format!(
            "{partition}/heartbeats_{stamp}_{suffix:020}.{extension}",
            stamp = partition.stamp(),
        );
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}/{key}", self.prefix)
        }
    }
}
