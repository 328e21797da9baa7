//! 编排核心的错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 CoreError 决定 FallbackToNext / SkipAndReport / Abort。

use thiserror::Error;

/// 记忆存储错误（SQLite、文件系统、序列化、键格式）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// 检查点只能由保留期清理删除
    #[error("record is immutable: {0}")]
    Immutable(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("invalid retention policy: {0}")]
    InvalidRetention(String),

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid trigger rule `{id}`: {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("conflicting flags: {0} and {1}")]
    ConflictingFlags(String, String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider {provider} failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    #[error("provider {0} timed out")]
    ProviderTimeout(String),

    /// 调用的整体时间预算已耗尽
    #[error("invocation deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 标记当前 provider 不可用，尝试回退链中的下一个
    FallbackToNext,
    /// 放弃该步骤并在结果中上报
    SkipAndReport(String),
    /// 终止当前计划
    Abort,
}
