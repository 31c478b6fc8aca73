use serde::{Deserialize, Serialize};

use crate::search::{Progress, SearchResult};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    /// 引擎已暂停；引擎不支持恢复
    Paused,
    Completed,
    Cancelled,
    Failed,
    Disposed,
}

impl JobState {
    /// 是否有运行中的引擎
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// 任务事件（广播给订阅者）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    JobStarted { key: String },
    JobCompleted { key: String, progress: Progress },
    ProgressUpdated { key: String, progress: Progress },
    ResultFound { key: String, result: SearchResult },
    ResultCaptured { key: String, result: SearchResult },
    ResultCountChanged { key: String, count: u64 },
    ConsoleOutput { key: String, text: String },
}

impl SearchEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::JobStarted { key }
            | Self::JobCompleted { key, .. }
            | Self::ProgressUpdated { key, .. }
            | Self::ResultFound { key, .. }
            | Self::ResultCaptured { key, .. }
            | Self::ResultCountChanged { key, .. }
            | Self::ConsoleOutput { key, .. } => key,
        }
    }
}
