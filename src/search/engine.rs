//! Search engine contract - the core only consumes it / 搜索引擎契约
//!
//! The brute-force enumerator lives outside this crate. It is started through an
//! [`EngineFactory`], reports progress through a monotonic batch counter and a
//! status flag, and pushes matches onto a [`ResultQueue`].

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::filter::FilterConfig;

/// Size of the seed character set used by the engine / 种子字符集大小
pub const SEED_ALPHABET_SIZE: u64 = 35;

/// Engine status / 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    NotStarted,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl EngineStatus {
    /// Whether the engine may still produce results / 引擎是否仍然存活
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// A raw match pushed by an engine worker / 引擎原始命中
#[derive(Debug, Clone, PartialEq)]
pub struct EngineHit {
    pub seed: String,
    pub score: i32,
    pub clause_scores: Vec<i32>,
    /// Free-form description from the engine (matched items etc.) / 命中详情
    pub detail: String,
}

impl EngineHit {
    pub fn new(seed: impl Into<String>, score: i32, clause_scores: Vec<i32>) -> Self {
        Self {
            seed: seed.into(),
            score,
            clause_scores,
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Thread-safe multi-producer FIFO of engine hits / 线程安全的结果队列
///
/// Workers clone the queue and `push`; the core only calls `try_pop`.
#[derive(Debug, Clone)]
pub struct ResultQueue {
    tx: Sender<EngineHit>,
    rx: Receiver<EngineHit>,
}

impl ResultQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, hit: EngineHit) {
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.tx.send(hit);
    }

    /// Non-blocking dequeue / 非阻塞出队
    pub fn try_pop(&self) -> Option<EngineHit> {
        match self.rx.try_recv() {
            Ok(hit) => Some(hit),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Dequeue until empty / 出队直到为空
    pub fn drain(&self) -> Vec<EngineHit> {
        self.rx.try_iter().collect()
    }

    /// Discard everything still queued, returns how many were dropped / 丢弃队列中剩余结果
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for ResultQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Running engine handle / 运行中的引擎
pub trait SearchEngine: Send + Sync {
    fn status(&self) -> EngineStatus;

    /// Monotonic count of batches completed in this run / 已完成批次数
    fn completed_batch_count(&self) -> u64;

    fn pause(&self);

    /// Release worker threads. May block; callers bound it with a timeout.
    fn dispose(&self);

    fn results(&self) -> &ResultQueue;

    fn alphabet_size(&self) -> u64 {
        SEED_ALPHABET_SIZE
    }
}

/// Parameters handed to the engine at start / 引擎启动参数
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub thread_count: usize,
    pub batch_character_count: u32,
    pub start_batch: u64,
    pub end_batch: Option<u64>,
    pub min_score: i32,
    /// Engines may stop early once this many results were produced
    pub max_results: Option<usize>,
}

/// Starts engines for a filter / 引擎工厂
pub trait EngineFactory: Send + Sync {
    /// The token is cancelled when the owning job stops; the engine must observe it.
    fn start(
        &self,
        config: &FilterConfig,
        params: EngineParams,
        cancel: CancellationToken,
    ) -> anyhow::Result<Arc<dyn SearchEngine>>;
}
