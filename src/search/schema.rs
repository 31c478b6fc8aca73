//! Search data model - job keys, criteria, results and progress / 搜索数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Job identity: filter + deck + stake / 任务标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Filter identifier (config file stem) / 过滤器标识
    pub filter_id: String,
    pub deck: String,
    pub stake: String,
}

impl JobKey {
    pub fn new(filter_id: impl Into<String>, deck: impl Into<String>, stake: impl Into<String>) -> Self {
        Self {
            filter_id: filter_id.into(),
            deck: deck.into(),
            stake: stake.into(),
        }
    }

    /// Display identity, used as the event key / 事件标识（仅用于展示）
    ///
    /// Not injective (`a_b`+`c` and `a`+`b_c` look the same); compare [`JobKey`]
    /// values or use [`JobKey::storage_name`] when uniqueness matters.
    pub fn id(&self) -> String {
        format!("{}_{}_{}", self.filter_id, self.deck, self.stake)
    }

    /// Injective, file-system safe name / 文件名安全且唯一的标识
    ///
    /// Every byte outside `[A-Za-z0-9]` is escaped as `_XX`, parts are joined with `-`.
    pub fn storage_name(&self) -> String {
        [&self.filter_id, &self.deck, &self.stake]
            .iter()
            .map(|part| escape_part(part))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Derive a filter id from a config path (file stem) / 从配置路径提取过滤器ID
    pub fn filter_id_from_path(config_ref: &str) -> String {
        Path::new(config_ref)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(config_ref)
            .to_string()
    }
}

fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Immutable parameters of one run / 单次运行的搜索参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub thread_count: usize,
    pub min_score: i32,
    pub batch_character_count: u32,
    pub deck: String,
    pub stake: String,
    pub start_batch: u64,
    pub end_batch: Option<u64>,
    pub max_results: Option<usize>,
    /// Path of the filter configuration / 过滤器配置路径
    pub config_ref: String,
}

impl SearchCriteria {
    pub fn new(config_ref: impl Into<String>, deck: impl Into<String>, stake: impl Into<String>) -> Self {
        Self {
            thread_count: 4,
            min_score: 0,
            batch_character_count: 2,
            deck: deck.into(),
            stake: stake.into(),
            start_batch: 0,
            end_batch: None,
            max_results: None,
            config_ref: config_ref.into(),
        }
    }

    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_min_score(mut self, min_score: i32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_batch_characters(mut self, count: u32) -> Self {
        self.batch_character_count = count;
        self
    }

    pub fn with_batch_range(mut self, start: u64, end: Option<u64>) -> Self {
        self.start_batch = start;
        self.end_batch = end;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(JobKey::filter_id_from_path(&self.config_ref), &self.deck, &self.stake)
    }

    /// Seeds per batch: alphabet_size ^ batch_character_count / 每批种子数
    pub fn seeds_per_batch(&self, alphabet_size: u64) -> u64 {
        alphabet_size.saturating_pow(self.batch_character_count)
    }

    /// Percent complete, only known when an end batch was given / 完成百分比
    pub fn percent_complete(&self, completed_batches: u64) -> Option<f32> {
        let end = self.end_batch?;
        let total = end.saturating_sub(self.start_batch);
        if total == 0 {
            return Some(100.0);
        }
        Some(((completed_batches as f64 / total as f64) * 100.0).min(100.0) as f32)
    }
}

/// One accepted seed / 搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub seed: String,
    pub total_score: i32,
    pub clause_scores: Vec<i32>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl SearchResult {
    pub fn new(seed: impl Into<String>, total_score: i32, clause_scores: Vec<i32>) -> Self {
        Self {
            seed: seed.into(),
            total_score,
            clause_scores,
            detail: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A row read back from a history store / 存储中的结果行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub seed: String,
    pub score: i64,
    pub clause_scores: Vec<i64>,
}

/// Column to order `top_n` queries by / 排序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOrder {
    Score,
    Seed,
    /// Dynamic column identified by clause label / 按子句标签排序
    Clause(String),
}

/// Metadata of one run, written at start and completed at the end / 运行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub config_ref: String,
    pub thread_count: usize,
    pub min_score: i32,
    pub batch_character_count: u32,
    pub deck: String,
    pub stake: String,
    pub start_batch: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub was_cancelled: Option<bool>,
    pub estimated_total_seeds: Option<u64>,
}

impl RunRecord {
    pub fn start(criteria: &SearchCriteria) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config_ref: criteria.config_ref.clone(),
            thread_count: criteria.thread_count,
            min_score: criteria.min_score,
            batch_character_count: criteria.batch_character_count,
            deck: criteria.deck.clone(),
            stake: criteria.stake.clone(),
            start_batch: criteria.start_batch,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            was_cancelled: None,
            estimated_total_seeds: None,
        }
    }
}

/// Progress report pushed to callers / 进度报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    pub percent_complete: Option<f32>,
    pub seeds_searched: u64,
    pub seeds_per_second: f64,
    pub results_found: u64,
    pub new_result: Option<SearchResult>,
    pub is_complete: bool,
    pub has_error: bool,
}

impl Progress {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_complete: true,
            has_error: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_identity() {
        let key = JobKey::new("myfilter", "Red", "White");
        assert_eq!(key.id(), "myfilter_Red_White");
        assert_eq!(key, JobKey::new("myfilter", "Red", "White"));
        assert_eq!(key.storage_name(), "myfilter-Red-White");
        assert_eq!(JobKey::new("a b/c", "Red", "White").storage_name(), "a_20b_2Fc-Red-White");
    }

    #[test]
    fn test_storage_name_is_injective() {
        let split_a = JobKey::new("a_b", "c", "White");
        let split_b = JobKey::new("a", "b_c", "White");
        assert_eq!(split_a.id(), split_b.id());
        assert_ne!(split_a, split_b);
        assert_ne!(split_a.storage_name(), split_b.storage_name());

        let spaced = JobKey::new("my filter", "Red", "White");
        let underscored = JobKey::new("my_filter", "Red", "White");
        assert_ne!(spaced.storage_name(), underscored.storage_name());
        assert_ne!(
            JobKey::new("a-b", "c", "d").storage_name(),
            JobKey::new("a", "b-c", "d").storage_name()
        );
    }

    #[test]
    fn test_criteria_key_from_config_path() {
        let criteria = SearchCriteria::new("/filters/perkeo.json", "Red", "White");
        assert_eq!(criteria.job_key(), JobKey::new("perkeo", "Red", "White"));
    }

    #[test]
    fn test_seeds_and_percent() {
        let criteria = SearchCriteria::new("f.json", "Red", "White")
            .with_batch_characters(4)
            .with_batch_range(10, Some(20));
        assert_eq!(criteria.seeds_per_batch(35), 35u64.pow(4));
        assert_eq!(criteria.percent_complete(5), Some(50.0));
        assert_eq!(criteria.percent_complete(50), Some(100.0));
        assert_eq!(SearchCriteria::new("f.json", "Red", "White").percent_complete(5), None);
    }
}
