use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use spool_api::{BlobSink, PluginError};

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// In-memory object store for tests and dry runs. Keeps objects by key,
/// counts `put` calls and can simulate upload failures.
#[derive(Default)]
pub struct MemorySink {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    /// Ключи, содержащие эту подстроку, отклоняются с I/O ошибкой.
    fail_matching: RwLock<Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `put` for keys containing `pattern`.
    pub async fn fail_matching(&self, pattern: impl Into<String>) {
        *self.fail_matching.write().await = Some(pattern.into());
    }

    pub async fn heal(&self) {
        *self.fail_matching.write().await = None;
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Количество успешных `put`, включая перезаписи.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }
}

impl BlobSink for MemorySink {
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(pattern) = self.fail_matching.read().await.as_deref() {
                if key.contains(pattern) {
                    return Err(PluginError::unavailable(format!("simulated upload failure for {key}")));
                }
            }
            self.objects.write().await.insert(key.to_string(), body);
            self.puts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites() {
        let sink = MemorySink::new();
        sink.put("a/b.parquet", vec![1]).await.unwrap();
        sink.put("a/b.parquet", vec![2, 3]).await.unwrap();
        assert_eq!(sink.get("a/b.parquet").await, Some(vec![2, 3]));
        assert_eq!(sink.keys().await.len(), 1);
        assert_eq!(sink.put_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures() {
        let sink = MemorySink::new();
        sink.fail_matching("2026101809").await;
        let err = sink.put("x/heartbeats_2026101809_1.parquet", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), spool_api::ErrorKind::Unavailable);
        sink.put("x/heartbeats_2026101810_1.parquet", vec![]).await.unwrap();

        sink.heal().await;
        sink.put("x/heartbeats_2026101809_1.parquet", vec![]).await.unwrap();
        assert_eq!(sink.put_count(), 2);
    }
}
