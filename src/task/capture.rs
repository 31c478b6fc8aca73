//! ResultCapture - drains an engine queue on its own task / 结果捕获循环
//!
//! Engine worker threads never touch storage: they push onto the queue and this
//! loop hands every hit to the run's [`ResultSink`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::models::ResultSink;
use super::types::SearchEvent;
use crate::error::JobError;
use crate::search::SearchEngine;

/// 结果捕获器
pub struct ResultCapture {
    key: String,
    poll: Duration,
    capturing: AtomicBool,
    captured: Arc<AtomicU64>,
    events: broadcast::Sender<SearchEvent>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ResultCapture {
    pub fn new(key: impl Into<String>, poll: Duration, events: broadcast::Sender<SearchEvent>) -> Self {
        Self {
            key: key.into(),
            poll,
            capturing: AtomicBool::new(false),
            captured: Arc::new(AtomicU64::new(0)),
            events,
            worker: Mutex::new(None),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn captured_count(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// 启动捕获循环；已在捕获时返回错误（重复消费会导致重复计数）
    pub fn start_capture(&self, engine: Arc<dyn SearchEngine>, sink: Arc<ResultSink>) -> Result<(), JobError> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyCapturing(self.key.clone()));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let captured = self.captured.clone();
        let events = self.events.clone();
        let key = self.key.clone();
        let poll = self.poll;

        let handle = tokio::spawn(async move {
            // 队列清空后才检查取消，停止时不会遗留已入队的结果
            loop {
                if let Some(hit) = engine.results().try_pop() {
                    for result in sink.accept(vec![hit]).await {
                        let count = captured.fetch_add(1, Ordering::Relaxed) + 1;
                        let _ = events.send(SearchEvent::ResultCaptured {
                            key: key.clone(),
                            result,
                        });
                        let _ = events.send(SearchEvent::ResultCountChanged {
                            key: key.clone(),
                            count,
                        });
                    }
                    continue;
                }

                if token.is_cancelled() {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        });

        *self.worker.lock() = Some((cancel, handle));
        tracing::debug!("Result capture started for {}", self.key);
        Ok(())
    }

    /// 停止捕获并等待循环退出，返回累计捕获数
    pub async fn stop_capture(&self) -> u64 {
        let worker = self.worker.lock().take();
        if let Some((cancel, handle)) = worker {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Result capture loop for {} ended abnormally: {}", self.key, e);
            }
            tracing::info!("Result capture stopped for {} ({} captured)", self.key, self.captured_count());
        }
        self.capturing.store(false, Ordering::SeqCst);
        self.captured_count()
    }

    /// 带超时的停止；超时后放弃等待
    pub async fn stop_capture_within(&self, timeout: Duration) -> u64 {
        match tokio::time::timeout(timeout, self.stop_capture()).await {
            Ok(count) => count,
            Err(_) => {
                tracing::warn!("Result capture for {} did not stop within {:?}, abandoning", self.key, timeout);
                self.capturing.store(false, Ordering::SeqCst);
                self.captured_count()
            }
        }
    }
}
