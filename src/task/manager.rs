use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::job::SearchJob;
use super::types::{JobState, SearchEvent};
use crate::config::AppConfig;
use crate::error::JobError;
use crate::filter::{ConfigLoader, FilterConfig, JsonFilterLoader};
use crate::search::{EngineFactory, HistoryStore, JobKey, SearchCriteria, StoredResult};

/// 快速搜索结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuickResults {
    /// false only when the search could not run at all
    pub success: bool,
    pub timed_out: bool,
    pub results: Vec<StoredResult>,
    pub labels: Vec<String>,
    pub seeds_searched: u64,
    pub elapsed_ms: u64,
    /// Ephemeral store file, already deleted when this is returned
    pub store_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// 临时存储清理守卫：无论从哪个分支退出都删除文件
struct EphemeralStore {
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Drop for EphemeralStore {
    fn drop(&mut self) {
        HistoryStore::delete_files(&self.path);
    }
}

/// 搜索任务注册表（每个任务键至多一个任务，广播所有任务事件）
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<JobKey, Arc<SearchJob>>>,
    config: AppConfig,
    loader: Arc<dyn ConfigLoader>,
    factory: Arc<dyn EngineFactory>,
    event_sender: broadcast::Sender<SearchEvent>,
    /// 父取消范围；shutdown 时取消全部任务
    scope: CancellationToken,
}

impl JobRegistry {
    pub fn new(config: AppConfig, loader: Arc<dyn ConfigLoader>, factory: Arc<dyn EngineFactory>) -> Self {
        let (event_sender, _) = broadcast::channel(config.search.event_capacity.max(1));
        Self {
            jobs: Arc::new(DashMap::new()),
            config,
            loader,
            factory,
            event_sender,
            scope: CancellationToken::new(),
        }
    }

    /// 使用全局配置和 JSON 过滤器加载器
    pub fn with_factory(factory: Arc<dyn EngineFactory>) -> Self {
        Self::new(crate::config::config(), Arc::new(JsonFilterLoader), factory)
    }

    /// 订阅所有任务的事件
    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.event_sender.subscribe()
    }

    pub fn history_root(&self) -> PathBuf {
        self.config.get_history_db_dir()
    }

    fn build_job(&self, key: JobKey, root: &Path, events: broadcast::Sender<SearchEvent>) -> Arc<SearchJob> {
        Arc::new(SearchJob::new(
            key,
            self.config.search.clone(),
            Arc::new(HistoryStore::new(root)),
            self.loader.clone(),
            self.factory.clone(),
            events,
            self.scope.child_token(),
        ))
    }

    /// 获取或创建任务；已存在时原样返回（不重置累计结果）
    pub fn create_or_reuse(&self, key: &JobKey) -> Arc<SearchJob> {
        let root = self.history_root();
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() == JobState::Disposed {
                    // 已释放的任务不可复用
                    let job = self.build_job(key.clone(), &root, self.event_sender.clone());
                    entry.insert(job.clone());
                    tracing::debug!("Replaced disposed job {}", key);
                    job
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let job = self.build_job(key.clone(), &root, self.event_sender.clone());
                entry.insert(job.clone());
                tracing::info!("Job created: {}", key);
                job
            }
        }
    }

    /// 从磁盘恢复任务；没有历史文件时返回 None（不会创建文件）
    pub async fn restore(&self, key: &JobKey) -> Option<Arc<SearchJob>> {
        if let Some(job) = self.get(key) {
            return Some(job);
        }

        let root = self.history_root();
        if !HistoryStore::exists(&root, key) {
            tracing::debug!("No history to restore for {}", key);
            return None;
        }

        let job = self.create_or_reuse(key);
        if !job.attach_store().await {
            tracing::warn!("Failed to reattach history for {}", key);
            return None;
        }
        tracing::info!("Job restored from {:?}", HistoryStore::path_for(&root, key));
        Some(job)
    }

    fn key_for(criteria: &SearchCriteria, config: Option<&FilterConfig>) -> Result<JobKey, JobError> {
        if !criteria.config_ref.trim().is_empty() {
            return Ok(criteria.job_key());
        }
        match config {
            Some(config) if !config.name.trim().is_empty() => {
                Ok(JobKey::new(config.name.trim(), &criteria.deck, &criteria.stake))
            }
            _ => Err(JobError::MissingConfigPath),
        }
    }

    /// 创建/复用任务并启动搜索
    pub async fn start_search(
        &self,
        criteria: SearchCriteria,
        config: Option<FilterConfig>,
    ) -> Result<Arc<SearchJob>, JobError> {
        let key = Self::key_for(&criteria, config.as_ref())?;
        let job = self.create_or_reuse(&key);
        job.start(criteria, config).await?;
        Ok(job)
    }

    /// 取消全部任务（不等待）
    pub fn stop_all(&self) {
        for entry in self.jobs.iter() {
            entry.value().stop();
        }
        tracing::info!("Stop requested for {} job(s)", self.jobs.len());
    }

    /// 停止、释放并移除某个过滤器的所有任务，返回移除数量
    pub async fn stop_by_filter(&self, filter_id: &str) -> usize {
        let keys: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|entry| entry.key().filter_id == filter_id)
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<Arc<SearchJob>> = keys
            .iter()
            .filter_map(|key| self.jobs.remove(key).map(|(_, job)| job))
            .collect();

        for job in &removed {
            job.stop();
        }
        futures::future::join_all(removed.iter().map(|job| job.dispose())).await;

        tracing::info!("Stopped {} job(s) for filter {}", removed.len(), filter_id);
        removed.len()
    }

    /// 停止并移除单个任务
    pub async fn remove(&self, key: &JobKey) -> bool {
        let Some((_, job)) = self.jobs.remove(key) else {
            return false;
        };
        job.stop();
        job.dispose().await;
        true
    }

    pub fn get(&self, key: &JobKey) -> Option<Arc<SearchJob>> {
        self.jobs.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<JobKey> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 取消父范围并释放所有任务
    pub async fn shutdown(&self) {
        self.scope.cancel();
        let keys: Vec<JobKey> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        let jobs: Vec<Arc<SearchJob>> = keys
            .iter()
            .filter_map(|key| self.jobs.remove(key).map(|(_, job)| job))
            .collect();
        futures::future::join_all(jobs.iter().map(|job| job.dispose())).await;
        tracing::info!("Job registry shut down ({} job(s) disposed)", jobs.len());
    }

    /// 临时快速搜索：独立任务 + 临时存储，超时强制停止，退出时删除存储文件
    pub async fn run_quick_search(&self, criteria: SearchCriteria, config: Option<FilterConfig>) -> QuickResults {
        let started = Instant::now();
        let settings = &self.config.search;
        let mut outcome = QuickResults::default();

        let key = match Self::key_for(&criteria, config.as_ref()) {
            Ok(key) => key,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let dir = match tempfile::Builder::new().prefix("quick_search_").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("Failed to create quick search directory: {}", e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        let store_path = HistoryStore::path_for(dir.path(), &key);
        outcome.store_path = Some(store_path.clone());

        // 私有事件通道：快速搜索不广播给注册表订阅者
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let job = self.build_job(key.clone(), dir.path(), events);
        let _cleanup = EphemeralStore {
            path: store_path,
            _dir: dir,
        };

        tracing::info!("Quick search started for {} (timeout {:?})", key, settings.quick_search_timeout());
        if let Err(e) = job.start(criteria, config).await {
            outcome.error = Some(e.to_string());
        } else if job.state() == JobState::Idle {
            // 配置加载失败，引擎从未启动
            outcome.error = Some(job.last_progress().message);
        } else if tokio::time::timeout(settings.quick_search_timeout(), job.wait()).await.is_err() {
            outcome.timed_out = true;
            job.force_stop();
            job.wait().await;
            tracing::info!("Quick search for {} timed out, returning partial results", key);
        }

        if outcome.error.is_none() {
            if job.state() == JobState::Failed {
                outcome.error = Some(job.last_progress().message);
            }
            outcome.results = job.top_results(Some(settings.quick_search_limit)).await;
            outcome.labels = job.store().labels().await;
            outcome.seeds_searched = job.last_progress().seeds_searched;
        }
        job.dispose().await;

        outcome.success = outcome.error.is_none();
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Quick search for {} finished in {}ms ({} result(s), timed out: {})",
            key,
            outcome.elapsed_ms,
            outcome.results.len(),
            outcome.timed_out
        );
        outcome
    }
}
