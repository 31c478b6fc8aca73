//! 结果历史存储 - 每个任务键一个 SQLite 文件
//!
//! 存储方案：
//! - results表：seed（主键）+ score + 每个评分子句一列（动态）
//! - 动态列由第一个带标签的结果冻结，之后不再迁移
//! - history_meta表：持久化冻结的标签，重新打开时恢复
//! - runs表：每次运行一条记录（开始时写入，结束时补全）
//!
//! 特性：
//! - WAL模式 + busy_timeout
//! - seed主键：重复写入即覆盖，支持断点续跑
//! - 批量插入 + 锁重试
//! - 所有存储错误只记录日志，不向调用方传播

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::schema::{JobKey, ResultOrder, RunRecord, SearchResult, StoredResult};

const MAX_RETRIES: u32 = 3;

#[derive(Default)]
struct StoreState {
    db: Option<Pool<Sqlite>>,
    path: Option<PathBuf>,
    /// results表是否已创建
    table_ready: bool,
    /// 冻结的子句标签
    labels: Option<Vec<String>>,
    /// 与labels一一对应的列名
    columns: Vec<String>,
    /// 复用的插入语句（sqlx按连接缓存预编译语句）
    insert_sql: Option<String>,
}

/// 结果历史存储
pub struct HistoryStore {
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl HistoryStore {
    /// 在指定目录下创建存储（尚未绑定任何文件）
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// 获取指定任务键的数据库路径
    pub fn path_for(root: &Path, key: &JobKey) -> PathBuf {
        root.join(format!("history_{}.db", key.storage_name()))
    }

    /// 检查指定任务键的数据库是否存在
    pub fn exists(root: &Path, key: &JobKey) -> bool {
        Self::path_for(root, key).exists()
    }

    /// 删除数据库文件（含 WAL / SHM）
    pub fn delete_files(db_path: &Path) {
        let db_shm = db_path.with_extension("db-shm");
        let db_wal = db_path.with_extension("db-wal");

        std::fs::remove_file(db_path).ok();
        std::fs::remove_file(&db_shm).ok();
        std::fs::remove_file(&db_wal).ok();

        tracing::info!("History database deleted: {:?}", db_path);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 当前绑定的文件
    pub async fn path(&self) -> Option<PathBuf> {
        self.state.lock().await.path.clone()
    }

    pub async fn is_bound(&self) -> bool {
        self.state.lock().await.db.is_some()
    }

    /// 绑定到任务键对应的文件（关闭之前的连接，文件不存在则创建）
    pub async fn bind(&self, key: &JobKey) -> bool {
        let db_path = Self::path_for(&self.root, key);
        let mut state = self.state.lock().await;

        if let Some(db) = state.db.take() {
            db.close().await;
        }
        *state = StoreState::default();

        match Self::open(&db_path).await {
            Ok((db, labels, table_ready)) => {
                state.columns = labels.as_deref().map(column_names).unwrap_or_default();
                state.labels = labels;
                state.table_ready = table_ready;
                state.insert_sql = table_ready.then(|| insert_sql(&state.columns));
                state.db = Some(db);
                state.path = Some(db_path.clone());
                tracing::info!("History database bound: {:?} (key: {})", db_path, key);
                true
            }
            Err(e) => {
                tracing::error!("Failed to open history database {:?}: {}", db_path, e);
                false
            }
        }
    }

    async fn open(db_path: &Path) -> Result<(Pool<Sqlite>, Option<Vec<String>>, bool), sqlx::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let db = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                config_ref TEXT NOT NULL,
                thread_count INTEGER NOT NULL,
                min_score INTEGER NOT NULL,
                batch_character_count INTEGER NOT NULL,
                deck TEXT NOT NULL,
                stake TEXT NOT NULL,
                start_batch INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                was_cancelled INTEGER,
                estimated_total_seeds INTEGER
            )
        "#,
        )
        .execute(&db)
        .await?;

        let labels: Option<(String,)> =
            sqlx::query_as("SELECT value FROM history_meta WHERE key = 'labels'")
                .fetch_optional(&db)
                .await?;
        let labels = labels
            .and_then(|(json,)| serde_json::from_str::<Vec<String>>(&json).ok())
            .filter(|l| !l.is_empty());

        let table: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'results'",
        )
        .fetch_optional(&db)
        .await?;

        Ok((db, labels, table.is_some()))
    }

    /// 冻结的子句标签（未冻结时为空）
    pub async fn labels(&self) -> Vec<String> {
        self.state.lock().await.labels.clone().unwrap_or_default()
    }

    /// 添加单个结果
    pub async fn add(&self, result: &SearchResult, labels: &[String]) -> bool {
        self.add_batch(std::slice::from_ref(result), labels).await
    }

    /// 批量添加结果（带重试机制）
    pub async fn add_batch(&self, results: &[SearchResult], labels: &[String]) -> bool {
        if results.is_empty() {
            return true;
        }

        let mut state = self.state.lock().await;
        let Some(db) = state.db.clone() else {
            tracing::warn!("History store not bound, dropping {} result(s)", results.len());
            return false;
        };

        if let Err(e) = Self::ensure_schema(&db, &mut state, labels).await {
            tracing::error!("Failed to initialize results schema: {}", e);
            return false;
        }

        let frozen = state.labels.clone().unwrap_or_default();
        let rows: Vec<(&str, i64, Vec<i64>)> = results
            .iter()
            .map(|r| {
                (
                    r.seed.as_str(),
                    r.total_score as i64,
                    map_scores(&frozen, labels, &r.clause_scores),
                )
            })
            .collect();
        let sql = state
            .insert_sql
            .clone()
            .unwrap_or_else(|| insert_sql(&state.columns));

        let mut last_error = String::new();
        for attempt in 0..MAX_RETRIES {
            match Self::do_insert_batch(&db, &sql, &rows).await {
                Ok(()) => return true,
                Err(e) => {
                    last_error = e.to_string();
                    if last_error.contains("database is locked") || last_error.contains("SQLITE_BUSY") {
                        let delay = 100 * (attempt + 1) as u64;
                        tracing::debug!(
                            "History database locked, retrying in {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    break;
                }
            }
        }

        tracing::error!("Failed to store {} result(s): {}", rows.len(), last_error);
        false
    }

    /// 创建results表；第一次收到非空标签时冻结动态列
    async fn ensure_schema(
        db: &Pool<Sqlite>,
        state: &mut StoreState,
        labels: &[String],
    ) -> Result<(), sqlx::Error> {
        let needs_table = !state.table_ready;
        let freeze = state.labels.is_none() && !labels.is_empty();
        if !needs_table && !freeze {
            return Ok(());
        }

        let mut tx = db.begin().await?;

        if needs_table {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS results (
                    seed TEXT PRIMARY KEY,
                    score INTEGER NOT NULL
                )
            "#,
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_score ON results(score DESC)")
                .execute(&mut *tx)
                .await?;
        }

        let columns = if freeze { column_names(labels) } else { state.columns.clone() };
        if freeze {
            for column in &columns {
                sqlx::query(&format!(
                    "ALTER TABLE results ADD COLUMN \"{}\" INTEGER NOT NULL DEFAULT 0",
                    column
                ))
                .execute(&mut *tx)
                .await?;
            }

            let json = serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string());
            sqlx::query("INSERT OR REPLACE INTO history_meta (key, value) VALUES ('labels', ?)")
                .bind(json)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        state.table_ready = true;
        if freeze {
            tracing::info!("Results schema frozen with {} clause column(s): {:?}", labels.len(), labels);
            state.labels = Some(labels.to_vec());
            state.columns = columns;
        }
        state.insert_sql = Some(insert_sql(&state.columns));
        Ok(())
    }

    /// 实际执行批量插入
    async fn do_insert_batch(
        db: &Pool<Sqlite>,
        sql: &str,
        rows: &[(&str, i64, Vec<i64>)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        for (seed, score, clause_scores) in rows {
            let mut query = sqlx::query(sql).bind(*seed).bind(*score);
            for value in clause_scores {
                query = query.bind(*value);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// 查询前N条结果（limit为None时不限制）
    pub async fn top_n(&self, order: ResultOrder, ascending: bool, limit: Option<usize>) -> Vec<StoredResult> {
        let state = self.state.lock().await;
        let Some(db) = state.db.as_ref() else {
            return Vec::new();
        };
        if !state.table_ready {
            return Vec::new();
        }

        let order_column = match &order {
            ResultOrder::Score => "score".to_string(),
            ResultOrder::Seed => "seed".to_string(),
            ResultOrder::Clause(label) => state
                .labels
                .as_ref()
                .and_then(|labels| labels.iter().position(|l| l == label))
                .and_then(|i| state.columns.get(i).cloned())
                .unwrap_or_else(|| "score".to_string()),
        };
        let direction = if ascending { "ASC" } else { "DESC" };
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(&format!(
            "SELECT * FROM results ORDER BY \"{}\" {}, seed ASC LIMIT ?",
            order_column, direction
        ))
        .bind(limit)
        .fetch_all(db)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Failed to query results: {}", e);
                return Vec::new();
            }
        };

        rows.iter()
            .map(|row| StoredResult {
                seed: row.try_get("seed").unwrap_or_default(),
                score: row.try_get("score").unwrap_or(0),
                clause_scores: state
                    .columns
                    .iter()
                    .map(|c| row.try_get::<i64, _>(c.as_str()).unwrap_or(0))
                    .collect(),
            })
            .collect()
    }

    /// 结果总数
    pub async fn count(&self) -> u64 {
        let state = self.state.lock().await;
        let Some(db) = state.db.as_ref() else {
            return 0;
        };
        if !state.table_ready {
            return 0;
        }

        match sqlx::query("SELECT COUNT(*) as cnt FROM results").fetch_one(db).await {
            Ok(r) => r.get::<i64, _>("cnt") as u64,
            Err(e) => {
                tracing::error!("Failed to count results: {}", e);
                0
            }
        }
    }

    /// 写入运行开始记录
    pub async fn begin_run(&self, record: &RunRecord) -> bool {
        let state = self.state.lock().await;
        let Some(db) = state.db.as_ref() else {
            return false;
        };

        let result = sqlx::query(
            r#"INSERT OR REPLACE INTO runs
               (run_id, config_ref, thread_count, min_score, batch_character_count,
                deck, stake, start_batch, started_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.run_id)
        .bind(&record.config_ref)
        .bind(record.thread_count as i64)
        .bind(record.min_score as i64)
        .bind(record.batch_character_count as i64)
        .bind(&record.deck)
        .bind(&record.stake)
        .bind(record.start_batch as i64)
        .bind(record.started_at.to_rfc3339())
        .execute(db)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to write run record {}: {}", record.run_id, e);
            return false;
        }
        true
    }

    /// 补全运行结束记录
    pub async fn complete_run(&self, record: &RunRecord) -> bool {
        let state = self.state.lock().await;
        let Some(db) = state.db.as_ref() else {
            return false;
        };

        let result = sqlx::query(
            r#"UPDATE runs SET finished_at = ?, duration_ms = ?, was_cancelled = ?,
               estimated_total_seeds = ? WHERE run_id = ?"#,
        )
        .bind(record.finished_at.map(|t| t.to_rfc3339()))
        .bind(record.duration_ms.map(|d| d as i64))
        .bind(record.was_cancelled)
        .bind(record.estimated_total_seeds.map(|s| s as i64))
        .bind(&record.run_id)
        .execute(db)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to complete run record {}: {}", record.run_id, e);
            return false;
        }
        true
    }

    /// 所有运行记录（按开始时间排序）
    pub async fn runs(&self) -> Vec<RunRecord> {
        let state = self.state.lock().await;
        let Some(db) = state.db.as_ref() else {
            return Vec::new();
        };

        let rows = sqlx::query("SELECT * FROM runs ORDER BY started_at ASC")
            .fetch_all(db)
            .await
            .unwrap_or_default();

        rows.iter()
            .map(|row| {
                let started_at: String = row.get("started_at");
                let finished_at: Option<String> = row.try_get("finished_at").ok().flatten();
                RunRecord {
                    run_id: row.get("run_id"),
                    config_ref: row.get("config_ref"),
                    thread_count: row.get::<i64, _>("thread_count") as usize,
                    min_score: row.get::<i64, _>("min_score") as i32,
                    batch_character_count: row.get::<i64, _>("batch_character_count") as u32,
                    deck: row.get("deck"),
                    stake: row.get("stake"),
                    start_batch: row.get::<i64, _>("start_batch") as u64,
                    started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    finished_at: finished_at
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&chrono::Utc)),
                    duration_ms: row
                        .try_get::<Option<i64>, _>("duration_ms")
                        .ok()
                        .flatten()
                        .map(|d| d as u64),
                    was_cancelled: row.try_get::<Option<bool>, _>("was_cancelled").ok().flatten(),
                    estimated_total_seeds: row
                        .try_get::<Option<i64>, _>("estimated_total_seeds")
                        .ok()
                        .flatten()
                        .map(|s| s as u64),
                }
            })
            .collect()
    }

    /// 导出CSV（表头来自冻结的标签）
    pub async fn export_csv(&self, path: &Path) -> bool {
        let labels = self.labels().await;
        let rows = self.top_n(ResultOrder::Score, false, None).await;

        let mut out = String::from("seed,score");
        for label in &labels {
            out.push(',');
            out.push_str(&csv_field(label));
        }
        out.push('\n');

        for row in &rows {
            out.push_str(&csv_field(&row.seed));
            out.push(',');
            out.push_str(&row.score.to_string());
            for i in 0..labels.len() {
                out.push(',');
                out.push_str(&row.clause_scores.get(i).copied().unwrap_or(0).to_string());
            }
            out.push('\n');
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match tokio::fs::write(path, out).await {
            Ok(()) => {
                tracing::info!("Exported {} result(s) to {:?}", rows.len(), path);
                true
            }
            Err(e) => {
                tracing::error!("Failed to export results to {:?}: {}", path, e);
                false
            }
        }
    }

    /// 关闭连接（幂等）
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        if let Some(db) = state.db.take() {
            db.close().await;
            tracing::debug!("History database closed: {:?}", state.path);
        }
        state.insert_sql = None;
    }
}

/// 标签 -> 列名（只保留安全字符，重名追加序号）
fn column_names(labels: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let cleaned: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let base = format!("c_{}", cleaned);
        let mut column = base.clone();
        let mut n = 2;
        while columns.contains(&column) {
            column = format!("{}_{}", base, n);
            n += 1;
        }
        columns.push(column);
    }
    columns
}

fn insert_sql(columns: &[String]) -> String {
    let mut names = String::from("seed, score");
    let mut params = String::from("?, ?");
    for column in columns {
        names.push_str(&format!(", \"{}\"", column));
        params.push_str(", ?");
    }
    format!("INSERT OR REPLACE INTO results ({}) VALUES ({})", names, params)
}

/// 把调用方的分数映射到冻结的列上
///
/// 标签相同（或未提供）时按位置：不足补0，多余截断；标签不同时按名称匹配。
fn map_scores(frozen: &[String], provided: &[String], scores: &[i32]) -> Vec<i64> {
    if provided.is_empty() || provided == frozen {
        return (0..frozen.len())
            .map(|i| scores.get(i).copied().unwrap_or(0) as i64)
            .collect();
    }
    frozen
        .iter()
        .map(|label| {
            provided
                .iter()
                .position(|p| p == label)
                .and_then(|i| scores.get(i))
                .copied()
                .unwrap_or(0) as i64
        })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn bound_store(dir: &Path) -> HistoryStore {
        let store = HistoryStore::new(dir);
        assert!(store.bind(&JobKey::new("abc", "Red", "White")).await);
        store
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;

        assert!(store.top_n(ResultOrder::Score, false, Some(10)).await.is_empty());
        assert_eq!(store.count().await, 0);
        assert!(HistoryStore::exists(dir.path(), &JobKey::new("abc", "Red", "White")));
    }

    #[tokio::test]
    async fn test_unbound_store_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        assert!(!store.add(&SearchResult::new("AAAA", 1, vec![]), &[]).await);
        assert!(store.top_n(ResultOrder::Score, false, None).await.is_empty());
        store.dispose().await;
        store.dispose().await;
    }

    #[tokio::test]
    async fn test_zero_fill_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;
        let l = labels(&["a", "b", "c"]);

        assert!(store.add(&SearchResult::new("SHORT", 10, vec![1]), &l).await);
        assert!(store.add(&SearchResult::new("LONG", 20, vec![1, 2, 3, 4, 5]), &l).await);

        let rows = store.top_n(ResultOrder::Score, false, None).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seed, "LONG");
        assert_eq!(rows[0].clause_scores, vec![1, 2, 3]);
        assert_eq!(rows[1].seed, "SHORT");
        assert_eq!(rows[1].clause_scores, vec![1, 0, 0]);
    }

    #[tokio::test]
    async fn test_replace_on_same_seed() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;
        let l = labels(&["a"]);

        store.add(&SearchResult::new("SAME", 5, vec![1]), &l).await;
        store.add(&SearchResult::new("SAME", 9, vec![3]), &l).await;

        let rows = store.top_n(ResultOrder::Score, false, None).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 9);
        assert_eq!(rows[0].clause_scores, vec![3]);
    }

    #[tokio::test]
    async fn test_schema_frozen_by_first_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;

        // No labels yet: base table only
        store.add(&SearchResult::new("EARLY", 3, vec![7]), &[]).await;
        assert!(store.labels().await.is_empty());

        store.add(&SearchResult::new("FIRST", 4, vec![1, 2]), &labels(&["x", "y"])).await;
        store.add(&SearchResult::new("OTHER", 5, vec![9]), &labels(&["z"])).await;
        assert_eq!(store.labels().await, labels(&["x", "y"]));

        let rows = store.top_n(ResultOrder::Seed, true, None).await;
        assert_eq!(rows.iter().map(|r| r.seed.as_str()).collect::<Vec<_>>(), vec!["EARLY", "FIRST", "OTHER"]);
        assert_eq!(rows[0].clause_scores, vec![0, 0]);
        // "z" is not a frozen column, nothing maps
        assert_eq!(rows[2].clause_scores, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_reordered_labels_map_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;

        store.add(&SearchResult::new("A", 1, vec![1, 2]), &labels(&["x", "y"])).await;
        store.add(&SearchResult::new("B", 2, vec![20, 10]), &labels(&["y", "x"])).await;

        let rows = store.top_n(ResultOrder::Clause("x".to_string()), false, None).await;
        assert_eq!(rows[0].seed, "B");
        assert_eq!(rows[0].clause_scores, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_schema_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = JobKey::new("abc", "Red", "White");
        {
            let store = bound_store(dir.path()).await;
            store.add(&SearchResult::new("A", 1, vec![1, 2]), &labels(&["x", "y"])).await;
            store.dispose().await;
        }

        let store = HistoryStore::new(dir.path());
        assert!(store.bind(&key).await);
        assert_eq!(store.labels().await, labels(&["x", "y"]));
        store.add(&SearchResult::new("B", 2, vec![3]), &[]).await;
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_run_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;
        let criteria = crate::search::SearchCriteria::new("abc.json", "Red", "White").with_threads(8);

        let mut record = RunRecord::start(&criteria);
        assert!(store.begin_run(&record).await);
        record.finished_at = Some(chrono::Utc::now());
        record.duration_ms = Some(1500);
        record.was_cancelled = Some(true);
        record.estimated_total_seeds = Some(42);
        assert!(store.complete_run(&record).await);

        let runs = store.runs().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].thread_count, 8);
        assert_eq!(runs[0].was_cancelled, Some(true));
        assert_eq!(runs[0].estimated_total_seeds, Some(42));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let store = bound_store(dir.path()).await;
        let l = labels(&["joker, rare", "b"]);
        store.add(&SearchResult::new("LOW", 1, vec![1]), &l).await;
        store.add(&SearchResult::new("HIGH", 9, vec![4, 5]), &l).await;

        let out = dir.path().join("export/out.csv");
        assert!(store.export_csv(&out).await);
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text, "seed,score,\"joker, rare\",b\nHIGH,9,4,5\nLOW,1,1,0\n");
    }

    #[test]
    fn test_column_names_are_safe_and_unique() {
        assert_eq!(
            column_names(&labels(&["Joker Perkeo", "joker-perkeo", "x\";drop"])),
            vec!["c_joker_perkeo", "c_joker_perkeo_2", "c_x__drop"]
        );
    }

    #[test]
    fn test_delete_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history_x.db");
        std::fs::write(&path, b"").unwrap();
        std::fs::write(path.with_extension("db-wal"), b"").unwrap();
        HistoryStore::delete_files(&path);
        assert!(!path.exists());
        assert!(!path.with_extension("db-wal").exists());
    }
}
