//! 分层键：plan_<ts> / phase_<n> / task_<phase>.<n> / todo_<phase>.<task>.<n> / checkpoint_<ts>

use serde::{Deserialize, Serialize};

use crate::core::StoreError;

/// 记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Plan,
    Phase,
    Task,
    Todo,
    Checkpoint,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Plan => "plan",
            RecordKind::Phase => "phase",
            RecordKind::Task => "task",
            RecordKind::Todo => "todo",
            RecordKind::Checkpoint => "checkpoint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(RecordKind::Plan),
            "phase" => Some(RecordKind::Phase),
            "task" => Some(RecordKind::Task),
            "todo" => Some(RecordKind::Todo),
            "checkpoint" => Some(RecordKind::Checkpoint),
            _ => None,
        }
    }

    /// 由键推断类型；键格式不合法时报错
    pub fn of_key(key: &str) -> Result<Self, StoreError> {
        let (prefix, rest) = key
            .split_once('_')
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let (kind, groups) = match prefix {
            "plan" => (RecordKind::Plan, 1),
            "phase" => (RecordKind::Phase, 1),
            "task" => (RecordKind::Task, 2),
            "todo" => (RecordKind::Todo, 3),
            "checkpoint" => (RecordKind::Checkpoint, 1),
            _ => return Err(StoreError::InvalidKey(key.to_string())),
        };
        if digit_groups(rest, groups) {
            Ok(kind)
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }
}

fn digit_groups(s: &str, n: usize) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == n
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

pub fn plan_key(ts_ms: i64) -> String {
    format!("plan_{}", ts_ms)
}

pub fn phase_key(phase: u32) -> String {
    format!("phase_{}", phase)
}

pub fn task_key(phase: u32, n: u32) -> String {
    format!("task_{}.{}", phase, n)
}

pub fn todo_key(phase: u32, task: u32, n: u32) -> String {
    format!("todo_{}.{}.{}", phase, task, n)
}

pub fn checkpoint_key(ts_ms: i64) -> String {
    format!("checkpoint_{}", ts_ms)
}
