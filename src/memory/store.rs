//! 检查点记忆存储：每个会话一个 SQLite 文件
//!
//! 表结构：
//! - `records`：plan / phase / task / todo 记录（按键覆盖写入）
//! - `checkpoints`：只追加的快照；只有保留期清理可以删除
//! - `meta`：跨调用的少量状态（上次分区、上次检查点时间）
//!
//! 所有操作经 `spawn_blocking` 在同一把互斥锁下执行，同一会话任一时刻只有一个写者。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::memory::keys::{checkpoint_key, RecordKind};
use crate::memory::triggers::CheckpointReason;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    created_ms INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    reason TEXT NOT NULL,
    created_ms INTEGER NOT NULL,
    snapshot TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_created ON checkpoints(created_ms);
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// 一条记忆记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub kind: RecordKind,
}

/// 检查点：创建时刻的完整任务层级快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub reason: CheckpointReason,
    pub created_at: DateTime<Utc>,
    pub records: Vec<MemoryRecord>,
}

/// 保留策略（[retention]）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_checkpoint_days")]
    pub checkpoint_days: i64,
    /// 手动检查点不参与清理
    #[serde(default = "default_exempt_manual")]
    pub exempt_manual: bool,
    /// 各记录类型的保留天数（plan / phase / task / todo）；未列出的类型不清理
    #[serde(default = "default_record_days")]
    pub record_days: BTreeMap<String, i64>,
}

fn default_checkpoint_days() -> i64 {
    7
}

fn default_exempt_manual() -> bool {
    true
}

fn default_record_days() -> BTreeMap<String, i64> {
    BTreeMap::from([("todo".to_string(), 3), ("task".to_string(), 14)])
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            checkpoint_days: default_checkpoint_days(),
            exempt_manual: default_exempt_manual(),
            record_days: default_record_days(),
        }
    }
}

impl RetentionPolicy {
    /// 保留天数必须非负且能表示为时间间隔
    pub fn validate(&self) -> Result<(), StoreError> {
        retention_window(self.checkpoint_days, "checkpoint_days")?;
        for (kind, days) in &self.record_days {
            retention_window(*days, kind)?;
        }
        Ok(())
    }
}

fn retention_window(days: i64, what: &str) -> Result<Duration, StoreError> {
    if days < 0 {
        return Err(StoreError::InvalidRetention(format!("{}: {} days", what, days)));
    }
    Duration::try_days(days)
        .ok_or_else(|| StoreError::InvalidRetention(format!("{}: {} days is out of range", what, days)))
}

/// 早于 now - window 的毫秒时间戳；超出可表示范围时不清理任何数据
fn cutoff_ms(now: DateTime<Utc>, window: Duration) -> i64 {
    now.checked_sub_signed(window)
        .map(|t| t.timestamp_millis())
        .unwrap_or(i64::MIN)
}

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub checkpoints_removed: usize,
    pub records_removed: usize,
}

/// 会话记忆存储
#[derive(Debug, Clone)]
pub struct MemoryStore {
    session_id: String,
    conn: Arc<Mutex<Connection>>,
    dedup_window: Duration,
}

impl MemoryStore {
    /// 打开（或创建）会话数据库：`<data_dir>/sessions/<session_id>.sqlite`
    pub async fn open(
        data_dir: &Path,
        session_id: &str,
        dedup_window_ms: u64,
    ) -> Result<Self, StoreError> {
        let path = Self::session_path(data_dir, session_id);
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(Self::from_connection(session_id, conn, dedup_window_ms))
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory(session_id: &str, dedup_window_ms: u64) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(session_id, conn, dedup_window_ms))
    }

    fn from_connection(session_id: &str, conn: Connection, dedup_window_ms: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            dedup_window: Duration::milliseconds(dedup_window_ms.min(i64::MAX as u64) as i64),
        }
    }

    /// 会话 ID 中非 [A-Za-z0-9_-] 的字符替换为 `_`
    pub fn session_path(data_dir: &Path, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let name = if safe.is_empty() { "default".to_string() } else { safe };
        data_dir.join("sessions").join(format!("{}.sqlite", name))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// 写入 plan / phase / task / todo 记录；检查点只能通过 `checkpoint` 创建
    pub async fn write(
        &self,
        key: &str,
        value: serde_json::Value,
        kind: RecordKind,
    ) -> Result<(), StoreError> {
        self.write_at(key, value, kind, Utc::now()).await
    }

    /// 以指定时刻写入；保留期清理按同一时钟比较
    pub async fn write_at(
        &self,
        key: &str,
        value: serde_json::Value,
        kind: RecordKind,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let actual = RecordKind::of_key(key)?;
        if actual != kind {
            return Err(StoreError::InvalidKey(format!(
                "{} is a {} key, not {}",
                key,
                actual.as_str(),
                kind.as_str()
            )));
        }
        if kind == RecordKind::Checkpoint {
            return Err(StoreError::Immutable(key.to_string()));
        }
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        let now = now.timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO records (key, kind, value, created_ms) VALUES (?1, ?2, ?3, ?4)",
                params![key, kind.as_str(), text, now],
            )?;
            Ok(())
        })
        .await
    }

    /// 读取值；检查点键返回整个检查点的 JSON
    pub async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        if RecordKind::of_key(key)? == RecordKind::Checkpoint {
            return match self.read_checkpoint(key).await {
                Ok(cp) => Ok(Some(serde_json::to_value(cp)?)),
                Err(StoreError::CheckpointNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        }
        Ok(self.read_record(key).await?.map(|r| r.value))
    }

    pub async fn read_record(&self, key: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT key, kind, value, created_ms FROM records WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            row.map(record_from_row).transpose()
        })
        .await
    }

    /// 列出带前缀的键（含检查点），按字典序
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM records WHERE substr(key, 1, length(?1)) = ?1
                 UNION
                 SELECT id FROM checkpoints WHERE substr(id, 1, length(?1)) = ?1
                 ORDER BY 1",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    /// 删除记录；返回是否存在。检查点不可删除
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        if RecordKind::of_key(key)? == RecordKind::Checkpoint {
            return Err(StoreError::Immutable(key.to_string()));
        }
        let key = key.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
            Ok(n > 0)
        })
        .await
    }

    /// 创建检查点
    pub async fn checkpoint(&self, reason: CheckpointReason) -> Result<String, StoreError> {
        self.checkpoint_at(reason, Utc::now()).await
    }

    /// 以指定时刻创建检查点。快照与插入在同一事务内完成；
    /// 同一原因在去重窗口内重复调用返回已有 ID。
    pub async fn checkpoint_at(
        &self,
        reason: CheckpointReason,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let window_ms = self.dedup_window.num_milliseconds();
        let session_id = self.session_id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now_ms = now.timestamp_millis();

            let recent: Option<(String, i64)> = tx
                .query_row(
                    "SELECT id, created_ms FROM checkpoints WHERE reason = ?1
                     ORDER BY created_ms DESC LIMIT 1",
                    params![reason.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((id, created_ms)) = recent {
                if (now_ms - created_ms).abs() < window_ms {
                    tracing::debug!(session_id = %session_id, checkpoint = %id, reason = %reason, "checkpoint deduplicated");
                    return Ok(id);
                }
            }

            let records = snapshot_records(&tx)?;
            let snapshot = serde_json::to_string(&records)?;

            let mut ts = now_ms;
            let mut id = checkpoint_key(ts);
            while tx
                .query_row("SELECT 1 FROM checkpoints WHERE id = ?1", params![id], |_| Ok(()))
                .optional()?
                .is_some()
            {
                ts += 1;
                id = checkpoint_key(ts);
            }

            tx.execute(
                "INSERT INTO checkpoints (id, reason, created_ms, snapshot) VALUES (?1, ?2, ?3, ?4)",
                params![id, reason.as_str(), now_ms, snapshot],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_checkpoint_ms', ?1)",
                params![now_ms.to_string()],
            )?;
            tx.commit()?;

            tracing::info!(
                session_id = %session_id,
                checkpoint = %id,
                reason = %reason,
                records = records.len(),
                "checkpoint created"
            );
            Ok(id)
        })
        .await
    }

    pub async fn read_checkpoint(&self, id: &str) -> Result<Checkpoint, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, reason, created_ms, snapshot FROM checkpoints WHERE id = ?1",
                    params![id],
                    checkpoint_row,
                )
                .optional()?;
            match row {
                Some(row) => checkpoint_from_row(row),
                None => Err(StoreError::CheckpointNotFound(id)),
            }
        })
        .await
    }

    /// 最新的检查点（用于会话恢复）
    pub async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, reason, created_ms, snapshot FROM checkpoints
                     ORDER BY created_ms DESC, id DESC LIMIT 1",
                    [],
                    checkpoint_row,
                )
                .optional()?;
            row.map(checkpoint_from_row).transpose()
        })
        .await
    }

    /// 保留期清理
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        policy: &RetentionPolicy,
    ) -> Result<SweepReport, StoreError> {
        policy.validate()?;
        let policy = policy.clone();
        let session_id = self.session_id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let cutoff = cutoff_ms(now, retention_window(policy.checkpoint_days, "checkpoint_days")?);
            let checkpoints_removed = if policy.exempt_manual {
                tx.execute(
                    "DELETE FROM checkpoints WHERE created_ms < ?1 AND reason != 'manual'",
                    params![cutoff],
                )?
            } else {
                tx.execute("DELETE FROM checkpoints WHERE created_ms < ?1", params![cutoff])?
            };

            let mut records_removed = 0;
            for (kind, days) in &policy.record_days {
                let Some(kind) = RecordKind::parse(kind) else {
                    tracing::warn!(kind = %kind, "unknown record kind in retention policy");
                    continue;
                };
                if kind == RecordKind::Checkpoint {
                    continue;
                }
                let cutoff = cutoff_ms(now, retention_window(*days, kind.as_str())?);
                records_removed += tx.execute(
                    "DELETE FROM records WHERE kind = ?1 AND created_ms < ?2",
                    params![kind.as_str(), cutoff],
                )?;
            }
            tx.commit()?;

            if checkpoints_removed + records_removed > 0 {
                tracing::info!(
                    session_id = %session_id,
                    checkpoints_removed,
                    records_removed,
                    "retention sweep"
                );
            }
            Ok(SweepReport {
                checkpoints_removed,
                records_removed,
            })
        })
        .await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?)
        })
        .await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    /// 上一个检查点的时间（由 checkpoint 写入 meta）
    pub async fn last_checkpoint_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .get_meta("last_checkpoint_ms")
            .await?
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis))
    }
}

type RecordRow = (String, String, String, i64);
type CheckpointRow = (String, String, i64, String);

fn checkpoint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn record_from_row((key, kind, value, created_ms): RecordRow) -> Result<MemoryRecord, StoreError> {
    let kind = RecordKind::parse(&kind).ok_or_else(|| StoreError::InvalidKey(key.clone()))?;
    Ok(MemoryRecord {
        key,
        value: serde_json::from_str(&value)?,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        kind,
    })
}

fn checkpoint_from_row((id, reason, created_ms, snapshot): CheckpointRow) -> Result<Checkpoint, StoreError> {
    let reason = CheckpointReason::parse(&reason).ok_or_else(|| StoreError::InvalidKey(id.clone()))?;
    Ok(Checkpoint {
        id,
        reason,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        records: serde_json::from_str(&snapshot)?,
    })
}

fn snapshot_records(conn: &Connection) -> Result<Vec<MemoryRecord>, StoreError> {
    let mut stmt = conn.prepare("SELECT key, kind, value, created_ms FROM records ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(record_from_row).collect()
}
