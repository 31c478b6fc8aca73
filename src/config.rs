//! Application configuration module / 应用配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Result history storage / 结果历史存储
    #[serde(default)]
    pub history: HistoryConfig,
    /// Search job tuning / 搜索任务参数
    #[serde(default)]
    pub search: SearchSettings,
}

/// History storage configuration / 历史存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// History database directory (relative to data_dir) / 历史数据库目录
    pub db_dir: String,
}

/// Which loop owns draining the engine queue / 结果队列的消费者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// The supervising loop drains inline / 监督循环内联消费
    Inline,
    /// A dedicated ResultCapture loop drains / 独立捕获循环消费
    Capture,
}

/// Search job configuration / 搜索任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Supervising loop poll interval / 监督循环轮询间隔
    pub poll_interval_ms: u64,
    /// Final drain window after engine stop / 停止后的收尾时间
    pub grace_drain_ms: u64,
    /// ResultCapture poll interval when the queue is empty / 捕获循环空轮询间隔
    pub capture_poll_ms: u64,
    /// Max wait for the capture loop to exit on dispose / 捕获循环停止等待上限
    pub capture_stop_timeout_ms: u64,
    /// Max wait for engine disposal / 引擎释放等待上限
    pub engine_dispose_timeout_ms: u64,
    /// Quick search wall-clock limit / 快速搜索超时
    pub quick_search_timeout_ms: u64,
    /// Rows returned by a quick search / 快速搜索返回行数
    pub quick_search_limit: usize,
    pub drain_mode: DrainMode,
    /// Broadcast channel capacity / 事件通道容量
    pub event_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_dir: "history".to_string(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            grace_drain_ms: 100,
            capture_poll_ms: 10,
            capture_stop_timeout_ms: 1000,
            engine_dispose_timeout_ms: 2000,
            quick_search_timeout_ms: 5000,
            quick_search_limit: 100,
            drain_mode: DrainMode::Inline,
            event_capacity: 256,
        }
    }
}

impl SearchSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_drain(&self) -> Duration {
        Duration::from_millis(self.grace_drain_ms)
    }

    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }

    pub fn capture_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_stop_timeout_ms)
    }

    pub fn engine_dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_dispose_timeout_ms)
    }

    pub fn quick_search_timeout(&self) -> Duration {
        Duration::from_millis(self.quick_search_timeout_ms)
    }
}

impl AppConfig {
    /// Config rooted at a specific data directory / 指定数据目录的配置
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.history.data_dir = data_dir.as_ref().to_string_lossy().into_owned();
        config
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.history.data_dir)
    }

    /// Get history database directory / 获取历史数据库目录
    pub fn get_history_db_dir(&self) -> PathBuf {
        let data_dir = self.get_data_dir();
        if self.history.db_dir.is_empty() {
            data_dir
        } else {
            data_dir.join(&self.history.db_dir)
        }
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    load_config_from(&get_config_path())
}

/// Load configuration from a specific path / 从指定路径加载配置
pub fn load_config_from(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    save_config_to(config, &get_config_path())
}

fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config().unwrap_or_default();
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}
