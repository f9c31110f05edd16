use serde::Deserialize;

// ═══════════════════════════════════════════════════════════════
//  Buffer Config
// ═══════════════════════════════════════════════════════════════

/// Конфигурация локального буфера (`[buffer]`).
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Путь к файлу лога. Директория создаётся при открытии.
    #[serde(default = "default_buffer_path")]
    pub path: String,
    /// Минимум удалённых записей в логе, после которого разрешена компакция.
    #[serde(default = "default_compact_min_dead")]
    pub compact_min_dead: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: default_buffer_path(),
            compact_min_dead: default_compact_min_dead(),
        }
    }
}

fn default_buffer_path() -> String {
    "data/heartbeats.db".into()
}
fn default_compact_min_dead() -> usize {
    1024
}

// ═══════════════════════════════════════════════════════════════
//  Receive Config
// ═══════════════════════════════════════════════════════════════

/// Параметры long-poll чтения очереди.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveConfig {
    /// Максимум сообщений за один receive.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Сколько ждать новых сообщений, если очередь пуста.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            wait_seconds: default_wait_seconds(),
        }
    }
}

fn default_max_messages() -> usize {
    10
}
fn default_wait_seconds() -> u64 {
    20
}

// ═══════════════════════════════════════════════════════════════
//  Flush Config
// ═══════════════════════════════════════════════════════════════

/// Расписание консолидации буфера (`[flush]`).
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    /// Период между проходами flush, в секундах.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Выполнить финальный проход при остановке.
    #[serde(default)]
    pub on_shutdown: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            on_shutdown: false,
        }
    }
}

fn default_interval_secs() -> u64 {
    3600
}
