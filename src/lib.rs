pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod search;
pub mod task;

pub use config::{AppConfig, DrainMode, SearchSettings};
pub use error::JobError;
pub use filter::{ConfigLoader, FilterClause, FilterConfig, JsonFilterLoader};
pub use search::{
    EngineFactory, EngineHit, EngineParams, EngineStatus, HistoryStore, JobKey, Progress, ResultOrder, ResultQueue,
    RunRecord, SearchCriteria, SearchEngine, SearchResult, StoredResult,
};
pub use task::{JobRegistry, JobState, QuickResults, ResultCapture, SearchEvent, SearchJob};
