//! 检查点触发器：时间 / 高优先级任务完成 / 重大操作 / 错误
//!
//! 各触发器独立配置；同一时刻多个触发时按 error > risk > task > time 排序。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 检查点原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointReason {
    Time,
    Task,
    Risk,
    Error,
    Manual,
}

impl CheckpointReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointReason::Time => "time",
            CheckpointReason::Task => "task",
            CheckpointReason::Risk => "risk",
            CheckpointReason::Error => "error",
            CheckpointReason::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time" => Some(CheckpointReason::Time),
            "task" => Some(CheckpointReason::Task),
            "risk" => Some(CheckpointReason::Risk),
            "error" => Some(CheckpointReason::Error),
            "manual" => Some(CheckpointReason::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 触发器配置（[checkpoint]）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTriggerConfig {
    #[serde(default = "default_true")]
    pub time_enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: f64,
    #[serde(default = "default_true")]
    pub task_enabled: bool,
    #[serde(default = "default_true")]
    pub risk_enabled: bool,
    #[serde(default = "default_major_operations")]
    pub major_operations: Vec<String>,
    /// 文件数超过该值视为重大操作
    #[serde(default = "default_file_count_threshold")]
    pub file_count_threshold: usize,
    #[serde(default = "default_true")]
    pub error_enabled: bool,
    /// 同一原因在该窗口内只生成一个检查点
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> f64 {
    30.0
}

fn default_major_operations() -> Vec<String> {
    ["bulk_write", "bulk_delete", "delete", "migrate", "deploy", "rename_all"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_file_count_threshold() -> usize {
    10
}

fn default_dedup_window_ms() -> u64 {
    1000
}

impl Default for CheckpointTriggerConfig {
    fn default() -> Self {
        Self {
            time_enabled: true,
            interval_minutes: default_interval_minutes(),
            task_enabled: true,
            risk_enabled: true,
            major_operations: default_major_operations(),
            file_count_threshold: default_file_count_threshold(),
            error_enabled: true,
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

/// 一次评估的输入
#[derive(Debug, Clone, Default)]
pub struct TriggerInput {
    pub operation: String,
    pub file_count: usize,
    pub high_priority_completed: bool,
    pub error: bool,
    /// 上一个检查点时间；无则以会话已用时长判断
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub elapsed_session_minutes: f64,
    pub now: Option<DateTime<Utc>>,
}

/// 检查点触发器
#[derive(Debug, Clone, Default)]
pub struct CheckpointTriggers {
    config: CheckpointTriggerConfig,
}

impl CheckpointTriggers {
    pub fn new(config: CheckpointTriggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckpointTriggerConfig {
        &self.config
    }

    /// 操作是否属于重大操作（风险触发）
    pub fn is_major(&self, operation: &str, file_count: usize) -> bool {
        let op = operation.trim().to_lowercase();
        (!op.is_empty() && self.config.major_operations.iter().any(|m| m.eq_ignore_ascii_case(&op)))
            || file_count > self.config.file_count_threshold
    }

    /// 返回所有触发的原因（按紧急程度排序）
    pub fn evaluate(&self, input: &TriggerInput) -> Vec<CheckpointReason> {
        let c = &self.config;
        let mut fired = Vec::new();
        if c.error_enabled && input.error {
            fired.push(CheckpointReason::Error);
        }
        if c.risk_enabled && self.is_major(&input.operation, input.file_count) {
            fired.push(CheckpointReason::Risk);
        }
        if c.task_enabled && input.high_priority_completed {
            fired.push(CheckpointReason::Task);
        }
        if c.time_enabled && self.interval_elapsed(input) {
            fired.push(CheckpointReason::Time);
        }
        fired
    }

    fn interval_elapsed(&self, input: &TriggerInput) -> bool {
        let minutes = match (input.last_checkpoint, input.now) {
            (Some(last), Some(now)) => (now - last).num_milliseconds() as f64 / 60_000.0,
            (Some(last), None) => (Utc::now() - last).num_milliseconds() as f64 / 60_000.0,
            (None, _) => input.elapsed_session_minutes,
        };
        minutes >= self.config.interval_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_each_trigger_fires_independently() {
        let t = CheckpointTriggers::default();
        let now = Utc::now();

        let err = TriggerInput {
            error: true,
            last_checkpoint: Some(now),
            now: Some(now),
            ..Default::default()
        };
        assert_eq!(t.evaluate(&err), vec![CheckpointReason::Error]);

        let risky = TriggerInput {
            operation: "bulk_delete".into(),
            last_checkpoint: Some(now),
            now: Some(now),
            ..Default::default()
        };
        assert_eq!(t.evaluate(&risky), vec![CheckpointReason::Risk]);

        let many_files = TriggerInput {
            file_count: 11,
            last_checkpoint: Some(now),
            now: Some(now),
            ..Default::default()
        };
        assert_eq!(t.evaluate(&many_files), vec![CheckpointReason::Risk]);

        let stale = TriggerInput {
            last_checkpoint: Some(now - Duration::minutes(31)),
            now: Some(now),
            ..Default::default()
        };
        assert_eq!(t.evaluate(&stale), vec![CheckpointReason::Time]);
    }

    #[test]
    fn test_disabled_trigger_is_silent() {
        let t = CheckpointTriggers::new(CheckpointTriggerConfig {
            error_enabled: false,
            ..Default::default()
        });
        let input = TriggerInput {
            error: true,
            high_priority_completed: true,
            last_checkpoint: Some(Utc::now()),
            now: Some(Utc::now()),
            ..Default::default()
        };
        assert_eq!(t.evaluate(&input), vec![CheckpointReason::Task]);
    }

    #[test]
    fn test_time_trigger_without_prior_checkpoint_uses_session_age() {
        let t = CheckpointTriggers::default();
        let young = TriggerInput {
            elapsed_session_minutes: 5.0,
            ..Default::default()
        };
        assert!(t.evaluate(&young).is_empty());
        let old = TriggerInput {
            elapsed_session_minutes: 45.0,
            ..Default::default()
        };
        assert_eq!(t.evaluate(&old), vec![CheckpointReason::Time]);
    }
}
