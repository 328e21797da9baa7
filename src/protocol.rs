//! 调用协议：每个生命周期事件一条请求记录、一条响应记录（JSON，无流式）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ContextSnapshot, CoreError, Request};
use crate::execution::{ExecutionResult, StepOutcome};
use crate::gates::GateResult;
use crate::memory::Checkpoint;
use crate::resource::ResourceZone;

/// 生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SessionStart,
    PreOperation,
    PostOperation,
    PreCompaction,
    Notification,
    SessionStop,
    SubtaskStop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "SessionStart",
            EventType::PreOperation => "PreOperation",
            EventType::PostOperation => "PostOperation",
            EventType::PreCompaction => "PreCompaction",
            EventType::Notification => "Notification",
            EventType::SessionStop => "SessionStop",
            EventType::SubtaskStop => "SubtaskStop",
        }
    }
}

/// 宿主上报的步骤结果（PostOperation）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportedOutcome {
    pub provider: String,
    /// completed / failed / timed_out / skipped
    pub status: String,
    pub step: String,
    pub duration_ms: u64,
    pub fallback_used: bool,
}

/// 事件负载；所有字段可缺省
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payload {
    pub operation: String,
    pub target_paths: Vec<String>,
    pub description: String,
    pub flags: Vec<String>,
    pub resource_usage_percent: f64,
    pub context_usage_percent: f64,
    pub elapsed_session_minutes: f64,
    pub recent_operations: Vec<String>,
    /// 本次完成的任务是否为高优先级
    pub high_priority: bool,
    pub error: Option<String>,
    pub outcome: Option<ReportedOutcome>,
}

impl Payload {
    pub fn to_request(&self) -> Request {
        Request::new(self.description.clone())
            .with_operation(self.operation.clone())
            .with_flags(self.flags.clone())
            .with_files(self.target_paths.clone())
    }

    pub fn context(&self, session_id: &str) -> ContextSnapshot {
        ContextSnapshot {
            resource_usage_percent: self.resource_usage_percent,
            context_usage_percent: self.context_usage_percent,
            active_session_id: session_id.to_string(),
            recent_operations: self.recent_operations.clone(),
            elapsed_session_minutes: self.elapsed_session_minutes,
        }
    }
}

/// 调用请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(rename = "event-type")]
    pub event_type: EventType,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
}

impl InvocationRequest {
    pub fn new(event_type: EventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload: Payload::default(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let req: Self = serde_json::from_str(text).map_err(|e| CoreError::Protocol(e.to_string()))?;
        if req.session_id.trim().is_empty() {
            return Err(CoreError::Protocol("sessionId must not be empty".into()));
        }
        Ok(req)
    }
}

/// 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Degraded,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Degraded => "degraded",
            Status::Blocked => "blocked",
        }
    }

    /// 宿主进程退出码：blocked 为 2，其余为 0
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Blocked => 2,
            _ => 0,
        }
    }

    /// 只升级不降级
    pub fn escalate(&mut self, to: Status) {
        if to > *self {
            *self = to;
        }
    }
}

/// 响应中的单个步骤
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step_id: String,
    pub status: String,
    pub provider: Option<String>,
    pub fallback_used: bool,
    /// 依次尝试过的 provider
    pub attempted: Vec<String>,
    pub reason: Option<String>,
    pub duration_ms: u64,
}

impl From<&StepOutcome> for StepReport {
    fn from(o: &StepOutcome) -> Self {
        Self {
            step_id: o.step_id.clone(),
            status: o.status.as_str().to_string(),
            provider: o.provider.clone(),
            fallback_used: o.fallback_used,
            attempted: o.attempts.iter().map(|a| a.provider.clone()).collect(),
            reason: o.reason.clone(),
            duration_ms: o.duration_ms,
        }
    }
}

/// 会话开始时恢复的检查点摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredCheckpoint {
    pub id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub keys: Vec<String>,
}

impl From<&Checkpoint> for RecoveredCheckpoint {
    fn from(c: &Checkpoint) -> Self {
        Self {
            id: c.id.clone(),
            reason: c.reason.as_str().to_string(),
            created_at: c.created_at,
            keys: c.records.iter().map(|r| r.key.clone()).collect(),
        }
    }
}

/// 调用响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status: Status,
    pub gate_results: Vec<GateResult>,
    pub routing_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    pub requires_acknowledgment: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_checkpoint: Option<RecoveredCheckpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<ResourceZone>,
}

impl InvocationResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            gate_results: Vec::new(),
            routing_summary: None,
            checkpoint_id: None,
            requires_acknowledgment: false,
            steps: Vec::new(),
            skipped_steps: Vec::new(),
            recovered_checkpoint: None,
            zone: None,
        }
    }

    /// 把执行结果展开为步骤报告与跳过列表
    pub fn with_execution(mut self, result: &ExecutionResult) -> Self {
        let all = result.flatten();
        self.steps = all.iter().map(|o| StepReport::from(*o)).collect();
        self.skipped_steps = result.skipped().iter().map(|o| o.describe()).collect();
        self
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_defaults() {
        let text = r#"{
            "event-type": "PreOperation",
            "sessionId": "s1",
            "payload": {"operation": "edit", "targetPaths": ["src/a.rs"], "description": "fix it"}
        }"#;
        let req = InvocationRequest::from_json(text).unwrap();
        assert_eq!(req.event_type, EventType::PreOperation);
        assert_eq!(req.payload.target_paths, vec!["src/a.rs".to_string()]);
        assert_eq!(req.payload.resource_usage_percent, 0.0);
        assert!(req.payload.outcome.is_none());

        let request = req.payload.to_request();
        assert_eq!(request.operation_type, "edit");
        assert_eq!(req.payload.context("s1").active_session_id, "s1");
    }

    #[test]
    fn test_rejects_unknown_event_and_empty_session() {
        assert!(InvocationRequest::from_json(r#"{"event-type":"Bogus","sessionId":"s"}"#).is_err());
        assert!(InvocationRequest::from_json(r#"{"event-type":"Notification","sessionId":" "}"#).is_err());
    }

    #[test]
    fn test_status_escalates_only() {
        let mut s = Status::Ok;
        s.escalate(Status::Blocked);
        s.escalate(Status::Degraded);
        assert_eq!(s, Status::Blocked);
        assert_eq!(s.exit_code(), 2);
        assert_eq!(Status::Degraded.exit_code(), 0);
    }

    #[test]
    fn test_response_field_names() {
        let mut resp = InvocationResponse::ok();
        resp.checkpoint_id = Some("checkpoint_1".into());
        let v: serde_json::Value = serde_json::from_str(&resp.to_json().unwrap()).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["checkpointId"], "checkpoint_1");
        assert!(v.get("gateResults").is_some());
        assert!(v.get("requiresAcknowledgment").is_some());
        assert!(v.get("steps").is_none());
    }
}
