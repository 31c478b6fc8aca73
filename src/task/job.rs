//! SearchJob - one key's run controller / 单个任务键的运行控制器
//!
//! A job survives many start/stop cycles. Results accumulate across runs and are
//! never wiped when the job is reused.
//!
//! Run lifecycle:
//! 1. resolve the filter, bind the history store, write the run record
//! 2. start the engine with a per-run cancellation token
//! 3. supervise: poll status and batch counter, drain the queue, report progress
//! 4. grace drain, release the engine, complete the run record, report completion

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::capture::ResultCapture;
use super::models::{ResultSink, SpeedTracker};
use super::types::{JobState, SearchEvent};
use crate::config::{DrainMode, SearchSettings};
use crate::error::JobError;
use crate::filter::{ConfigLoader, FilterConfig};
use crate::search::{
    EngineFactory, EngineParams, HistoryStore, JobKey, Progress, ResultOrder, RunRecord, SearchCriteria,
    SearchEngine, SearchResult, StoredResult,
};

/// Engine handle that is released at most once, with a bound on how long that may take.
struct EngineSlot {
    engine: Arc<dyn SearchEngine>,
    released: AtomicBool,
}

impl EngineSlot {
    fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            engine,
            released: AtomicBool::new(false),
        }
    }

    async fn release(&self, key: &str, timeout: Duration) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = self.engine.clone();
        let handle = tokio::task::spawn_blocking(move || engine.dispose());
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => tracing::debug!("Engine for {} released", key),
            Ok(Err(e)) => tracing::error!("Engine for {} panicked during dispose: {}", key, e),
            Err(_) => tracing::warn!("Engine for {} did not release within {:?}, abandoning it", key, timeout),
        }
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    engine: Arc<EngineSlot>,
    capture: Option<Arc<ResultCapture>>,
    discard: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

/// Everything the supervising task owns for one run.
struct RunContext {
    key: JobKey,
    criteria: SearchCriteria,
    settings: SearchSettings,
    engine: Arc<EngineSlot>,
    sink: Arc<ResultSink>,
    capture: Option<Arc<ResultCapture>>,
    cancel: CancellationToken,
    discard: Arc<AtomicBool>,
    batches: Arc<AtomicU64>,
    record: RunRecord,
    started: Instant,
}

impl RunContext {
    fn seeds_searched(&self) -> u64 {
        let per_batch = self.criteria.seeds_per_batch(self.engine.engine.alphabet_size());
        self.batches.load(Ordering::Relaxed).saturating_mul(per_batch)
    }
}

enum RunOutcome {
    Finished,
    /// max_results accepted; the engine was cancelled but the run completed cleanly
    LimitReached,
    Cancelled,
    Failed(String),
}

/// 搜索任务
pub struct SearchJob {
    key: JobKey,
    settings: SearchSettings,
    store: Arc<HistoryStore>,
    loader: Arc<dyn ConfigLoader>,
    factory: Arc<dyn EngineFactory>,
    events: broadcast::Sender<SearchEvent>,
    /// Parent scope; every run token is a child of it
    scope: CancellationToken,
    state: RwLock<JobState>,
    criteria: RwLock<Option<SearchCriteria>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    last_progress: RwLock<Progress>,
    results: Arc<RwLock<Vec<SearchResult>>>,
    results_seen: Arc<AtomicU64>,
    run: Mutex<Option<ActiveRun>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SearchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchJob")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("results_seen", &self.results_seen())
            .finish()
    }
}

impl SearchJob {
    pub fn new(
        key: JobKey,
        settings: SearchSettings,
        store: Arc<HistoryStore>,
        loader: Arc<dyn ConfigLoader>,
        factory: Arc<dyn EngineFactory>,
        events: broadcast::Sender<SearchEvent>,
        scope: CancellationToken,
    ) -> Self {
        Self {
            key,
            settings,
            store,
            loader,
            factory,
            events,
            scope,
            state: RwLock::new(JobState::Idle),
            criteria: RwLock::new(None),
            started_at: RwLock::new(None),
            last_progress: RwLock::new(Progress::default()),
            results: Arc::new(RwLock::new(Vec::new())),
            results_seen: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    pub fn criteria(&self) -> Option<SearchCriteria> {
        self.criteria.read().clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    pub fn last_progress(&self) -> Progress {
        self.last_progress.read().clone()
    }

    /// Results accepted in memory across every run of this job
    pub fn results(&self) -> Vec<SearchResult> {
        self.results.read().clone()
    }

    pub fn results_seen(&self) -> u64 {
        self.results_seen.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> Arc<HistoryStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SearchEvent) {
        let _ = self.events.send(event);
    }

    fn console(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("[{}] {}", self.key, text);
        self.emit(SearchEvent::ConsoleOutput {
            key: self.key.id(),
            text,
        });
    }

    fn report(&self, progress: Progress) {
        *self.last_progress.write() = progress.clone();
        self.emit(SearchEvent::ProgressUpdated {
            key: self.key.id(),
            progress,
        });
    }

    fn set_state(&self, next: JobState) {
        let mut state = self.state.write();
        // Disposal is terminal
        if *state != JobState::Disposed {
            *state = next;
        }
    }

    /// Bind the store to this job's key if nothing is bound yet
    pub async fn attach_store(&self) -> bool {
        if self.store.is_bound().await {
            return true;
        }
        self.store.bind(&self.key).await
    }

    /// Start a run. A job that is already running is left alone.
    ///
    /// Only pre-flight problems are returned as errors; everything after that is
    /// reported through events.
    pub async fn start(self: &Arc<Self>, criteria: SearchCriteria, config: Option<FilterConfig>) -> Result<(), JobError> {
        let _guard = self.start_lock.lock().await;

        match self.state() {
            JobState::Disposed => return Err(JobError::Disposed(self.key.id())),
            state if state.is_active() => {
                tracing::info!("Search {} already running ({:?}), ignoring start", self.key, state);
                return Ok(());
            }
            _ => {}
        }

        if config.is_none() && criteria.config_ref.trim().is_empty() {
            return Err(JobError::MissingConfigPath);
        }

        let config = match config {
            Some(config) => config,
            None => match self.loader.load_from_path(Path::new(&criteria.config_ref)) {
                Some(config) => config,
                None => {
                    let message = format!("Failed to load filter configuration: {}", criteria.config_ref);
                    tracing::error!("[{}] {}", self.key, message);
                    self.report(Progress::error(message));
                    return Ok(());
                }
            },
        };
        self.console(format!("Loaded filter {}", config.summary()));

        self.attach_store().await;
        let record = RunRecord::start(&criteria);
        self.store.begin_run(&record).await;

        let cancel = self.scope.child_token();
        let sink = Arc::new(
            ResultSink::new(
                self.key.clone(),
                criteria.min_score,
                config.clause_labels(),
                self.store.clone(),
                self.results.clone(),
                self.results_seen.clone(),
                self.events.clone(),
            )
            .with_limit(criteria.max_results),
        );

        let params = EngineParams {
            thread_count: criteria.thread_count,
            batch_character_count: criteria.batch_character_count,
            start_batch: criteria.start_batch,
            end_batch: criteria.end_batch,
            min_score: criteria.min_score,
            max_results: criteria.max_results,
        };
        let engine = match self.factory.start(&config, params, cancel.clone()) {
            Ok(engine) => Arc::new(EngineSlot::new(engine)),
            Err(e) => {
                let err = JobError::EngineStart(e.to_string());
                tracing::error!("[{}] {}", self.key, err);
                self.set_state(JobState::Failed);

                let mut record = record;
                record.finished_at = Some(Utc::now());
                record.duration_ms = Some(0);
                record.was_cancelled = Some(false);
                record.estimated_total_seeds = Some(0);
                self.store.complete_run(&record).await;

                let progress = Progress::error(err.to_string());
                *self.last_progress.write() = progress.clone();
                self.emit(SearchEvent::JobCompleted {
                    key: self.key.id(),
                    progress,
                });
                return Ok(());
            }
        };

        let capture = match self.settings.drain_mode {
            DrainMode::Inline => None,
            DrainMode::Capture => {
                let capture = Arc::new(ResultCapture::new(
                    self.key.id(),
                    self.settings.capture_poll(),
                    self.events.clone(),
                ));
                if let Err(e) = capture.start_capture(engine.engine.clone(), sink.clone()) {
                    cancel.cancel();
                    engine.release(&self.key.id(), self.settings.engine_dispose_timeout()).await;
                    return Err(e);
                }
                Some(capture)
            }
        };

        let (done_tx, done_rx) = watch::channel(false);
        let discard = Arc::new(AtomicBool::new(false));
        *self.run.lock() = Some(ActiveRun {
            cancel: cancel.clone(),
            engine: engine.clone(),
            capture: capture.clone(),
            discard: discard.clone(),
            done: done_rx,
        });

        self.set_state(JobState::Running);
        *self.started_at.write() = Some(record.started_at);
        *self.criteria.write() = Some(criteria.clone());
        *self.last_progress.write() = Progress::default();
        self.emit(SearchEvent::JobStarted { key: self.key.id() });
        self.console(format!(
            "Search started: {} threads, min score {}, batch chars {}, from batch {}",
            criteria.thread_count, criteria.min_score, criteria.batch_character_count, criteria.start_batch
        ));

        let ctx = RunContext {
            key: self.key.clone(),
            criteria,
            settings: self.settings.clone(),
            engine,
            sink,
            capture,
            cancel,
            discard,
            batches: Arc::new(AtomicU64::new(0)),
            record,
            started: Instant::now(),
        };

        let job = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = Arc::new(ctx);
            let supervisor = tokio::spawn(Self::supervise(job.clone(), ctx.clone()));
            let outcome = match supervisor.await {
                Ok(outcome) => outcome,
                Err(e) => RunOutcome::Failed(format!("supervising loop aborted: {}", e)),
            };
            job.finish(&ctx, outcome).await;
            let _ = done_tx.send(true);
        });

        Ok(())
    }

    /// Supervising loop: one per run, bounded sleep between ticks.
    async fn supervise(job: Arc<Self>, ctx: Arc<RunContext>) -> RunOutcome {
        let engine = ctx.engine.engine.clone();
        let inline = ctx.capture.is_none();
        let poll = ctx.settings.poll_interval();
        let mut speed = SpeedTracker::new();
        let mut last_batches: Option<u64> = None;
        let mut latest: Option<SearchResult> = None;

        loop {
            if ctx.cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let status = engine.status();
            let batches = engine.completed_batch_count();
            ctx.batches.store(batches, Ordering::Relaxed);

            if inline {
                let hits = engine.results().drain();
                if !hits.is_empty() {
                    if let Some(last) = ctx.sink.accept(hits).await.pop() {
                        latest = Some(last);
                    }
                }
            }

            if ctx.sink.limit_reached() {
                tracing::info!("[{}] Result limit reached, stopping engine", ctx.key);
                ctx.cancel.cancel();
                return RunOutcome::LimitReached;
            }

            if last_batches != Some(batches) {
                last_batches = Some(batches);
                let seeds = ctx.seeds_searched();
                job.report(Progress {
                    message: format!("Searched {} batches", batches),
                    percent_complete: ctx.criteria.percent_complete(batches),
                    seeds_searched: seeds,
                    seeds_per_second: speed.update(seeds),
                    results_found: ctx.sink.accepted(),
                    new_result: latest.take(),
                    is_complete: false,
                    has_error: false,
                });
            }

            if !status.is_alive() {
                return match status {
                    crate::search::EngineStatus::Cancelled => RunOutcome::Cancelled,
                    _ => RunOutcome::Finished,
                };
            }

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return RunOutcome::Cancelled,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn finish(&self, ctx: &RunContext, outcome: RunOutcome) {
        let key = ctx.key.id();

        // Catch results published right at engine stop
        tokio::time::sleep(ctx.settings.grace_drain()).await;
        if ctx.discard.load(Ordering::SeqCst) {
            let dropped = ctx.engine.engine.results().clear();
            if dropped > 0 {
                tracing::info!("[{}] Discarded {} in-flight result(s) after force stop", ctx.key, dropped);
            }
        }
        match &ctx.capture {
            Some(capture) => {
                capture.stop_capture_within(ctx.settings.capture_stop_timeout()).await;
            }
            None => {
                let hits = ctx.engine.engine.results().drain();
                if !hits.is_empty() {
                    ctx.sink.accept(hits).await;
                }
            }
        }

        ctx.batches
            .store(ctx.engine.engine.completed_batch_count(), Ordering::Relaxed);
        ctx.engine.release(&key, ctx.settings.engine_dispose_timeout()).await;

        let was_cancelled = matches!(outcome, RunOutcome::Cancelled);
        let duration = ctx.started.elapsed();
        let seeds = ctx.seeds_searched();

        let mut record = ctx.record.clone();
        record.finished_at = Some(Utc::now());
        record.duration_ms = Some(duration.as_millis() as u64);
        record.was_cancelled = Some(was_cancelled);
        record.estimated_total_seeds = Some(seeds);
        self.store.complete_run(&record).await;

        let seconds = duration.as_secs_f64();
        let mut progress = Progress {
            message: String::new(),
            percent_complete: ctx.criteria.percent_complete(ctx.batches.load(Ordering::Relaxed)),
            seeds_searched: seeds,
            seeds_per_second: if seconds > 0.0 { seeds as f64 / seconds } else { 0.0 },
            results_found: ctx.sink.accepted(),
            new_result: None,
            is_complete: true,
            has_error: false,
        };

        match outcome {
            RunOutcome::Finished => {
                self.set_state(JobState::Completed);
                progress.message = "Search completed".to_string();
                progress.percent_complete = progress.percent_complete.map(|_| 100.0);
            }
            RunOutcome::LimitReached => {
                self.set_state(JobState::Completed);
                progress.message = "Search completed: result limit reached".to_string();
            }
            RunOutcome::Cancelled => {
                self.set_state(JobState::Cancelled);
                progress.message = "Search cancelled".to_string();
            }
            RunOutcome::Failed(error) => {
                tracing::error!("[{}] Search failed: {}", ctx.key, error);
                self.set_state(JobState::Failed);
                progress.message = format!("Search failed: {}", error);
                progress.has_error = true;
            }
        }

        self.console(format!(
            "{} after {:.1}s: ~{} seeds, {} result(s)",
            progress.message, seconds, seeds, progress.results_found
        ));
        *self.last_progress.write() = progress.clone();
        self.emit(SearchEvent::JobCompleted { key, progress });
    }

    /// Pause the engine. The engine has no resume primitive.
    pub fn pause(&self) -> bool {
        if self.state() != JobState::Running {
            return false;
        }
        let run = self.run.lock();
        let Some(run) = run.as_ref() else {
            return false;
        };
        run.engine.engine.pause();
        self.set_state(JobState::Paused);
        self.console("Search paused");
        true
    }

    /// Not supported by the engine; always returns false.
    pub fn resume(&self) -> bool {
        tracing::warn!("[{}] Resume requested but the engine cannot resume a paused search", self.key);
        false
    }

    /// Signal cancellation and return without waiting for the loop to exit.
    pub fn stop(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            run.cancel.cancel();
        }
    }

    /// Cancel and discard anything still queued so it cannot leak into a later run.
    pub fn force_stop(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            run.discard.store(true, Ordering::SeqCst);
            run.cancel.cancel();
            let dropped = run.engine.engine.results().clear();
            tracing::debug!("[{}] Force stop discarded {} queued result(s)", self.key, dropped);
        }
    }

    /// Wait until the current run (if any) has fully finished.
    pub async fn wait(&self) {
        let done = self.run.lock().as_ref().map(|run| run.done.clone());
        if let Some(mut done) = done {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Tear the job down: cancel, stop capture, release the engine, close the store.
    /// Every wait is bounded; a stuck engine is abandoned and logged.
    pub async fn dispose(&self) {
        {
            let mut state = self.state.write();
            if *state == JobState::Disposed {
                return;
            }
            *state = JobState::Disposed;
        }

        let run = self.run.lock().take();
        if let Some(run) = run {
            run.cancel.cancel();

            if let Some(capture) = &run.capture {
                capture.stop_capture_within(self.settings.capture_stop_timeout()).await;
            }

            let mut done = run.done.clone();
            let limit = self.settings.grace_drain() + self.settings.engine_dispose_timeout();
            let finished = tokio::time::timeout(limit, async {
                while !*done.borrow_and_update() {
                    if done.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
            if finished.is_err() {
                tracing::warn!("[{}] Run did not finish within {:?} during dispose", self.key, limit);
            }

            run.engine.release(&self.key.id(), self.settings.engine_dispose_timeout()).await;
        }

        self.store.dispose().await;
        tracing::info!("[{}] Job disposed", self.key);
    }

    /// Top stored results for this job
    pub async fn top_results(&self, limit: Option<usize>) -> Vec<StoredResult> {
        self.attach_store().await;
        self.store.top_n(ResultOrder::Score, false, limit).await
    }

    pub async fn export_csv(&self, path: &Path) -> bool {
        self.attach_store().await;
        self.store.export_csv(path).await
    }
}
