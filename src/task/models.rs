use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::types::SearchEvent;
use crate::search::{EngineHit, HistoryStore, JobKey, SearchResult};

/// 吞吐量统计（滑动窗口，窗口不足1秒时沿用上次速度）
#[derive(Debug)]
pub struct SpeedTracker {
    started_at: Instant,
    last_update: Option<Instant>,
    last_processed: u64,
    speed: f64,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_update: None,
            last_processed: 0,
            speed: 0.0,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn update(&mut self, processed: u64) -> f64 {
        let now = Instant::now();
        let speed = if let Some(last_update) = self.last_update {
            let secs = now.duration_since(last_update).as_secs_f64();
            if secs >= 1.0 {
                let diff = processed.saturating_sub(self.last_processed);
                let instant_speed = diff as f64 / secs;

                self.last_update = Some(now);
                self.last_processed = processed;

                if instant_speed > 0.0 {
                    instant_speed
                } else {
                    self.average(processed, now)
                }
            } else if self.speed > 0.0 {
                self.speed
            } else {
                self.average(processed, now)
            }
        } else {
            // 首次更新，使用平均速度
            self.last_update = Some(now);
            self.last_processed = processed;
            self.average(processed, now)
        };

        self.speed = speed;
        speed
    }

    fn average(&self, processed: u64, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.started_at).as_secs_f64();
        if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 单次运行的结果接收端
///
/// 过滤、包装引擎命中，追加到任务的结果列表并写入历史存储。
/// 每次运行只有一个消费者（监督循环或 ResultCapture）调用它。
pub struct ResultSink {
    key: JobKey,
    min_score: i32,
    labels: Vec<String>,
    store: Arc<HistoryStore>,
    results: Arc<RwLock<Vec<SearchResult>>>,
    results_seen: Arc<AtomicU64>,
    accepted: AtomicU64,
    /// 单次运行最多接受的结果数
    limit: Option<u64>,
    events: broadcast::Sender<SearchEvent>,
}

impl ResultSink {
    pub fn new(
        key: JobKey,
        min_score: i32,
        labels: Vec<String>,
        store: Arc<HistoryStore>,
        results: Arc<RwLock<Vec<SearchResult>>>,
        results_seen: Arc<AtomicU64>,
        events: broadcast::Sender<SearchEvent>,
    ) -> Self {
        Self {
            key,
            min_score,
            labels,
            store,
            results,
            results_seen,
            accepted: AtomicU64::new(0),
            limit: None,
            events,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit.map(|l| l as u64);
        self
    }

    /// 是否已达到结果上限
    pub fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.accepted() >= limit)
    }

    /// 本次运行接受的结果数
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// 过滤并记录一批命中，然后交给存储；返回被接受的结果
    pub async fn accept(&self, hits: Vec<EngineHit>) -> Vec<SearchResult> {
        let accepted = self.admit(hits);
        if !accepted.is_empty() {
            // 存储失败只记录日志，不中断搜索
            self.store.add_batch(&accepted, &self.labels).await;
        }
        accepted
    }

    fn admit(&self, hits: Vec<EngineHit>) -> Vec<SearchResult> {
        let key = self.key.id();
        let mut accepted = Vec::with_capacity(hits.len());

        for hit in hits {
            if hit.score < self.min_score {
                tracing::debug!("Dropping seed {} below min score ({} < {})", hit.seed, hit.score, self.min_score);
                continue;
            }

            if self.limit_reached() {
                tracing::debug!("Dropping seed {}, result limit reached", hit.seed);
                continue;
            }

            let mut result = SearchResult::new(hit.seed, hit.score, hit.clause_scores);
            result.detail = hit.detail;
            self.results.write().push(result.clone());
            self.accepted.fetch_add(1, Ordering::Relaxed);
            self.results_seen.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.send(SearchEvent::ResultFound {
                key: key.clone(),
                result: result.clone(),
            });
            accepted.push(result);
        }

        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_first_update_is_average() {
        let mut tracker = SpeedTracker::new();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let speed = tracker.update(1000);
        assert!(speed > 0.0);
        // Inside the window the previous speed is kept
        assert_eq!(tracker.update(2000), speed);
    }

    #[tokio::test]
    async fn test_sink_filters_min_score() {
        let dir = tempfile::tempdir().unwrap();
        let key = JobKey::new("f", "Red", "White");
        let store = Arc::new(HistoryStore::new(dir.path()));
        store.bind(&key).await;
        let (tx, mut rx) = broadcast::channel(16);
        let results = Arc::new(RwLock::new(Vec::new()));
        let seen = Arc::new(AtomicU64::new(0));

        let sink = ResultSink::new(key, 10, vec!["a".into()], store.clone(), results.clone(), seen.clone(), tx);
        let accepted = sink
            .accept(vec![EngineHit::new("LOW", 5, vec![5]), EngineHit::new("HIGH", 20, vec![20])])
            .await;

        assert_eq!(accepted.len(), 1);
        assert_eq!(sink.accepted(), 1);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(results.read()[0].seed, "HIGH");
        assert_eq!(store.count().await, 1);
        assert!(matches!(rx.try_recv(), Ok(SearchEvent::ResultFound { .. })));
    }

    #[tokio::test]
    async fn test_sink_caps_results_and_keeps_detail() {
        let dir = tempfile::tempdir().unwrap();
        let key = JobKey::new("f", "Red", "White");
        let store = Arc::new(HistoryStore::new(dir.path()));
        store.bind(&key).await;
        let (tx, _rx) = broadcast::channel(16);
        let results = Arc::new(RwLock::new(Vec::new()));

        let sink = ResultSink::new(key, 0, vec![], store.clone(), results.clone(), Arc::new(AtomicU64::new(0)), tx)
            .with_limit(Some(2));
        assert!(!sink.limit_reached());
        let accepted = sink
            .accept(vec![
                EngineHit::new("AAAA", 1, vec![]).with_detail("Blueprint, Brainstorm"),
                EngineHit::new("BBBB", 2, vec![]),
                EngineHit::new("CCCC", 3, vec![]),
            ])
            .await;

        assert_eq!(accepted.len(), 2);
        assert!(sink.limit_reached());
        assert_eq!(results.read()[0].detail, "Blueprint, Brainstorm");
        assert_eq!(store.count().await, 2);
    }
}
