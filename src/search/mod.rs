//! Search module - engine contract, data model and result history / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - The enumeration engine is an external collaborator, only its contract lives here
//! - Task layer controls runs, progress, cancellation; search layer only stores and queries
//! - Call direction: Task → Search (unidirectional) / 调用方向
//!
//! History features / 历史存储特性：
//! - One SQLite file per job key (WAL mode)
//! - Dynamic score columns frozen by the first labelled result
//! - Seed primary key: re-adding a seed replaces its row

pub mod engine;
pub mod history;
pub mod schema;

pub use engine::{EngineFactory, EngineHit, EngineParams, EngineStatus, ResultQueue, SearchEngine, SEED_ALPHABET_SIZE};
pub use history::HistoryStore;
pub use schema::{JobKey, Progress, ResultOrder, RunRecord, SearchCriteria, SearchResult, StoredResult};
