// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// Файловый sink (`[sink]`): объект `a/b/c.parquet` ложится в
/// `{root}/a/b/c.parquet`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FsSinkConfig {
    /// Корень "bucket'а". Создаётся при открытии.
    pub root: String,
}
