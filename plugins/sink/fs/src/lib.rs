mod config;

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;

use spool_api::{BlobSink, PluginError};

pub use config::FsSinkConfig;

// ════════════════════════════════════════════════════════════════
//  FsSink
// ════════════════════════════════════════════════════════════════

/// Объектное хранилище поверх локальной (или смонтированной) файловой
/// системы.
///
/// Объект пишется во временный файл рядом с целевым, fsync, затем
/// rename: читатель видит либо старую версию, либо новую целиком.
/// `put` возвращает `Ok` только после fsync директорий от объекта до
/// корня: вызывающий удаляет записи из буфера сразу после успеха.
/// Повторный `put` по тому же ключу перезаписывает объект.
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub async fn open(config: &FsSinkConfig) -> Result<Self, PluginError> {
        let root = PathBuf::from(&config.root);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PluginError::config(format!("sink root {}: {e}", root.display())))?;
        tracing::info!(root = %root.display(), "fs sink ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Путь объекта. Ключ: относительный путь из обычных компонентов.
    fn object_path(&self, key: &str) -> Result<PathBuf, PluginError> {
        let rel = Path::new(key);
        let valid = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(PluginError::rejected(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(rel))
    }

    async fn write_object(&self, key: &str, body: Vec<u8>) -> Result<(), PluginError> {
        let path = self.object_path(key)?;
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(PluginError::rejected(format!("invalid object key {key:?}")));
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PluginError::unavailable(format!("mkdir {}: {e}", dir.display())))?;

        let tmp = dir.join(format!(".{}.partial", name.to_string_lossy()));
        let result = async {
            let mut f = tokio::fs::File::create(&tmp).await?;
            f.write_all(&body).await?;
            f.sync_all().await?;
            drop(f);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PluginError::unavailable(format!("write {}: {e}", path.display())));
        }

        for d in dirs_to_sync(&self.root, dir) {
            sync_dir(&d)
                .await
                .map_err(|e| PluginError::unavailable(format!("fsync {}: {e}", d.display())))?;
        }
        tracing::debug!(key, bytes = body.len(), "object stored");
        Ok(())
    }
}

/// Директории, чьи записи меняет `put` в `dir`: сама `dir` и её предки
/// вплоть до корня sink'а (их могли только что создать).
fn dirs_to_sync(root: &Path, dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = dir
        .ancestors()
        .take_while(|d| d.starts_with(root))
        .map(Path::to_path_buf)
        .collect();
    if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
        dirs.push(parent.to_path_buf());
    }
    dirs
}

async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

impl BlobSink for FsSink {
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(self.write_object(key, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sink(dir: &Path) -> FsSink {
        FsSink::open(&FsSinkConfig {
            root: dir.join("bucket").display().to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn put_creates_nested_object() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path()).await;
        sink.put("hb/2026/10/18/09/x.parquet", vec![1, 2, 3]).await.unwrap();

        let path = sink.root().join("hb/2026/10/18/09/x.parquet");
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn syncs_every_directory_up_to_root() {
        let root = Path::new("/data/bucket");
        let dirs = dirs_to_sync(root, &root.join("hb/2026/10/18/09"));
        let want: Vec<PathBuf> = [
            "/data/bucket/hb/2026/10/18/09",
            "/data/bucket/hb/2026/10/18",
            "/data/bucket/hb/2026/10",
            "/data/bucket/hb/2026",
            "/data/bucket/hb",
            "/data/bucket",
            "/data",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(dirs, want);
    }

    #[tokio::test]
    async fn sync_dir_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path()).await;
        sink.put("hb/a.parquet", vec![1]).await.unwrap();
        assert!(sync_dir(&sink.root().join("hb")).await.is_ok());
        assert!(sync_dir(&sink.root().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path()).await;
        sink.put("a.parquet", vec![1]).await.unwrap();
        sink.put("a.parquet", vec![9, 9]).await.unwrap();
        assert_eq!(std::fs::read(sink.root().join("a.parquet")).unwrap(), vec![9, 9]);
    }

    #[tokio::test]
    async fn rejects_keys_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path()).await;
        for key in ["", "../x.parquet", "/etc/x.parquet", "a/../../x"] {
            assert!(sink.put(key, vec![]).await.is_err(), "accepted {key:?}");
        }
    }
}
