mod config;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use spool_api::{AckToken, PluginError, QueueMessage, QueueSource};

pub use config::DirQueueConfig;

const DEAD_LETTER_DIR: &str = "dead-letter";

// ════════════════════════════════════════════════════════════════
//  DirQueue
// ════════════════════════════════════════════════════════════════

/// Очередь поверх директории. Producer атомарно кладёт файл (запись во
/// временное имя с точкой + rename), consumer читает файлы в порядке
/// имён.
///
/// Leases живут в памяти процесса: после рестарта все неподтверждённые
/// файлы снова видимы, что согласуется с at-least-once.
pub struct DirQueue {
    inbox: PathBuf,
    extension: String,
    visibility: Duration,
    max_receive_count: Option<u32>,
    poll_interval: Duration,
    leases: Mutex<Leases>,
}

#[derive(Default)]
struct Leases {
    /// file name → (receipt, invisible until)
    active: HashMap<String, (String, Instant)>,
    /// Сколько раз файл был выдан. Сбрасывается только ack'ом или
    /// успешным переносом в dead-letter.
    receives: HashMap<String, u32>,
    next_receipt: u64,
}

impl DirQueue {
    pub async fn open(config: &DirQueueConfig) -> Result<Self, PluginError> {
        let inbox = PathBuf::from(&config.inbox);
        tokio::fs::create_dir_all(&inbox)
            .await
            .map_err(|e| PluginError::config(format!("queue inbox {}: {e}", inbox.display())))?;
        tracing::info!(
            inbox = %inbox.display(),
            extension = %config.extension,
            visibility_secs = config.visibility_timeout_secs,
            "dir queue ready"
        );
        Ok(Self {
            inbox,
            extension: config.extension.trim_start_matches('.').to_string(),
            visibility: Duration::from_secs(config.visibility_timeout_secs),
            max_receive_count: config.max_receive_count,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            leases: Mutex::new(Leases::default()),
        })
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Имена файлов-сообщений в порядке имён.
    async fn list(&self) -> Result<Vec<String>, PluginError> {
        let mut dir = tokio::fs::read_dir(&self.inbox)
            .await
            .map_err(|e| PluginError::unavailable(format!("read inbox {}: {e}", self.inbox.display())))?;
        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| PluginError::unavailable(format!("read inbox: {e}")))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let matches = Path::new(&name).extension().is_some_and(|ext| ext == self.extension.as_str());
            if matches && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn poll(&self, max_messages: usize) -> Result<Vec<QueueMessage>, PluginError> {
        let names = self.list().await?;
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        leases.active.retain(|_, (_, until)| *until > now);
        // Файлы, исчезнувшие без ack (удалены или перенесены снаружи).
        {
            let present: HashSet<&str> = names.iter().map(String::as_str).collect();
            leases.receives.retain(|name, _| present.contains(name.as_str()));
        }

        let mut out = Vec::new();
        for name in names {
            if out.len() >= max_messages {
                break;
            }
            if leases.active.contains_key(&name) {
                continue;
            }

            let received = leases.receives.get(&name).copied().unwrap_or(0);
            if self.max_receive_count.is_some_and(|max| received >= max) {
                if self.dead_letter(&name, received).await {
                    leases.receives.remove(&name);
                }
                continue;
            }

            let path = self.inbox.join(&name);
            let body = match tokio::fs::read(&path).await {
                Ok(body) => body,
                // Файл удалён между list и read.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PluginError::unavailable(format!("read {}: {e}", path.display()))),
            };

            leases.next_receipt += 1;
            let receipt = format!("{name}#{}", leases.next_receipt);
            leases.active.insert(name.clone(), (receipt.clone(), now + self.visibility));
            *leases.receives.entry(name.clone()).or_default() += 1;
            out.push(QueueMessage {
                id: name,
                body,
                ack: AckToken(receipt),
            });
        }
        Ok(out)
    }

    /// Перенести файл в `dead-letter/`. `false`: файл остался в inbox.
    async fn dead_letter(&self, name: &str, receives: u32) -> bool {
        let dir = self.inbox.join(DEAD_LETTER_DIR);
        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::rename(self.inbox.join(name), dir.join(name)).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::warn!(message = name, receives, "message moved to dead-letter");
                true
            }
            Err(e) => {
                tracing::error!(message = name, receives, error = %e, "cannot move message to dead-letter");
                false
            }
        }
    }

    async fn remove(&self, token: &AckToken) -> Result<(), PluginError> {
        let Some((name, _)) = token.as_str().rsplit_once('#') else {
            return Err(PluginError::rejected(format!("malformed receipt {}", token.as_str())));
        };

        let mut leases = self.leases.lock().await;
        match leases.active.get(name) {
            Some((receipt, _)) if receipt == token.as_str() => {}
            _ => return Err(PluginError::rejected(format!("receipt {} is stale", token.as_str()))),
        }

        let path = self.inbox.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PluginError::unavailable(format!("remove {}: {e}", path.display()))),
        }
        leases.active.remove(name);
        leases.receives.remove(name);
        Ok(())
    }
}

impl QueueSource for DirQueue {
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                let batch = self.poll(max_messages).await?;
                let now = Instant::now();
                if !batch.is_empty() || now >= deadline {
                    return Ok(batch);
                }
                tokio::time::sleep_until(deadline.min(now + self.poll_interval)).await;
            }
        })
    }

    fn ack<'a>(
        &'a self,
        token: &'a AckToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(self.remove(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> DirQueueConfig {
        DirQueueConfig {
            inbox: dir.join("inbox").display().to_string(),
            extension: "json".into(),
            visibility_timeout_secs: 0,
            max_receive_count: None,
            poll_interval_ms: 10,
        }
    }

    #[tokio::test]
    async fn reads_in_name_order_and_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::open(&config(dir.path())).await.unwrap();
        std::fs::write(q.inbox().join("002.json"), b"b").unwrap();
        std::fs::write(q.inbox().join("001.json"), b"a").unwrap();
        std::fs::write(q.inbox().join(".003.json"), b"partial").unwrap();
        std::fs::write(q.inbox().join("004.txt"), b"other").unwrap();

        let batch = q.receive(10, Duration::ZERO).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["001.json", "002.json"]);
        assert_eq!(batch[0].body, b"a");
    }

    #[tokio::test]
    async fn ack_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.visibility_timeout_secs = 60;
        let q = DirQueue::open(&cfg).await.unwrap();
        std::fs::write(q.inbox().join("a.json"), b"{}").unwrap();

        let batch = q.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        // Невидим, пока lease активен.
        assert!(q.receive(10, Duration::ZERO).await.unwrap().is_empty());

        q.ack(&batch[0].ack).await.unwrap();
        assert!(!q.inbox().join("a.json").exists());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::open(&config(dir.path())).await.unwrap();
        std::fs::write(q.inbox().join("a.json"), b"{}").unwrap();

        let first = q.receive(10, Duration::ZERO).await.unwrap();
        let second = q.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(q.ack(&first[0].ack).await.is_err(), "stale receipt accepted");
        q.ack(&second[0].ack).await.unwrap();
    }

    #[tokio::test]
    async fn poison_message_goes_to_dead_letter() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_receive_count = Some(2);
        let q = DirQueue::open(&cfg).await.unwrap();
        std::fs::write(q.inbox().join("bad.json"), b"garbage").unwrap();

        assert_eq!(q.receive(10, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(q.receive(10, Duration::ZERO).await.unwrap().len(), 1);
        assert!(q.receive(10, Duration::ZERO).await.unwrap().is_empty());
        assert!(q.inbox().join(DEAD_LETTER_DIR).join("bad.json").exists());
    }

    #[tokio::test]
    async fn poison_message_stays_parked_when_dead_letter_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_receive_count = Some(1);
        let q = DirQueue::open(&cfg).await.unwrap();
        std::fs::write(q.inbox().join("bad.json"), b"garbage").unwrap();
        // Обычный файл на месте директории: перенос не удастся.
        std::fs::write(q.inbox().join(DEAD_LETTER_DIR), b"").unwrap();

        assert_eq!(q.receive(10, Duration::ZERO).await.unwrap().len(), 1);
        for _ in 0..3 {
            assert!(q.receive(10, Duration::ZERO).await.unwrap().is_empty());
        }
        assert!(q.inbox().join("bad.json").exists());
        assert_eq!(q.leases.lock().await.receives.get("bad.json"), Some(&1));

        std::fs::remove_file(q.inbox().join(DEAD_LETTER_DIR)).unwrap();
        assert!(q.receive(10, Duration::ZERO).await.unwrap().is_empty());
        assert!(q.inbox().join(DEAD_LETTER_DIR).join("bad.json").exists());
        assert!(q.leases.lock().await.receives.is_empty());
    }

    #[tokio::test]
    async fn forgets_receive_counts_of_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::open(&config(dir.path())).await.unwrap();
        std::fs::write(q.inbox().join("a.json"), b"{}").unwrap();
        std::fs::write(q.inbox().join("b.json"), b"{}").unwrap();
        assert_eq!(q.receive(10, Duration::ZERO).await.unwrap().len(), 2);

        std::fs::remove_file(q.inbox().join("a.json")).unwrap();
        assert_eq!(q.receive(10, Duration::ZERO).await.unwrap().len(), 1);

        let leases = q.leases.lock().await;
        assert_eq!(leases.receives.len(), 1);
        assert_eq!(leases.receives.get("b.json"), Some(&2));
    }

    #[tokio::test]
    async fn long_poll_picks_up_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::open(&config(dir.path())).await.unwrap();
        let inbox = q.inbox().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(inbox.join("late.json"), b"{}").await.unwrap();
        });
        let batch = q.receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
