// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// Очередь-директория (`[queue]`): каждый файл `*.{extension}` в `inbox`
/// является одним сообщением, ack удаляет файл.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DirQueueConfig {
    pub inbox: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Сколько полученное сообщение невидимо для повторного receive.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// После стольких неподтверждённых получений файл переносится в
    /// `{inbox}/dead-letter`. Без лимита: повторяется бесконечно.
    #[serde(default)]
    pub max_receive_count: Option<u32>,
    /// Период опроса директории во время long-poll.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_extension() -> String {
    "json".into()
}
fn default_visibility_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    500
}
