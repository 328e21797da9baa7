//! 编排器：处理一个生命周期事件，返回一条响应
//!
//! PreOperation 走完整流水线：检测 → 分区 → 路由 → 计划 → 执行前门禁 → 执行（在途监控并行）
//! → 执行后门禁 → 检查点触发 → 记录持久化与结果日志。其余事件只做检查点与记账。
//! 每个事件都在 `[timeouts]` 配置的预算内完成，超时后不再做任何工作。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::config::AppConfig;
use crate::core::{CoreError, InvocationScope, Request, RuntimeTables, TableHandle};
use crate::execution::{ExecutionCoordinator, ExecutionResult, ProviderRegistry, StepStatus};
use crate::gates::{aggregate, GateInput, GateResult, GateStage, InFlightMonitor, Severity};
use crate::memory::keys::{phase_key, plan_key, task_key};
use crate::memory::{
    CheckpointReason, MemoryStore, OutcomeEvent, OutcomeLog, RecordKind, RoutingBias, TriggerInput,
};
use crate::protocol::{EventType, InvocationRequest, InvocationResponse, Payload, RecoveredCheckpoint, Status};
use crate::resource::{ResourceManager, ResourceZone};
use crate::routing::{ExecutionPlan, ProviderHealth, RoutingDecision};

/// 路由偏置文件名（位于数据目录下）
pub const ROUTING_BIAS_FILE: &str = "routing_bias.json";

const META_LAST_ZONE: &str = "last_zone";
const META_PHASE_SEQ: &str = "phase_seq";

/// 编排器：持有运行时表句柄、provider 注册表与按会话缓存的存储
pub struct Orchestrator {
    tables: TableHandle,
    registry: Arc<ProviderRegistry>,
    data_dir: PathBuf,
    outcome_log: OutcomeLog,
    stores: Mutex<HashMap<String, MemoryStore>>,
}

impl Orchestrator {
    pub fn new(tables: TableHandle, registry: ProviderRegistry, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            tables,
            registry: Arc::new(registry),
            outcome_log: OutcomeLog::new(&data_dir),
            data_dir,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// 按配置构建：读取数据目录中的路由偏置（如有），按目录注册内置 provider
    pub async fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let bias_path = config.app.data_dir.join(ROUTING_BIAS_FILE);
        let bias = match RoutingBias::load(&bias_path).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %bias_path.display(), error = %e, "ignoring unreadable routing bias");
                None
            }
        };
        let tables = TableHandle::from_config(config, bias.as_ref())?;
        let registry = ProviderRegistry::from_catalog(tables.current().routing.catalog());
        Ok(Self::new(tables, registry, config.app.data_dir.clone()))
    }

    pub fn tables(&self) -> &TableHandle {
        &self.tables
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn outcome_log(&self) -> &OutcomeLog {
        &self.outcome_log
    }

    /// 会话存储（同一会话复用同一连接，保证单写者）
    pub async fn store(&self, session_id: &str) -> Result<MemoryStore, CoreError> {
        let mut stores = self.stores.lock().await;
        if let Some(s) = stores.get(session_id) {
            return Ok(s.clone());
        }
        let dedup = self.tables.current().triggers.config().dedup_window_ms;
        let store = MemoryStore::open(&self.data_dir, session_id, dedup).await?;
        stores.insert(session_id.to_string(), store.clone());
        Ok(store)
    }

    /// 处理一个事件；任何内部错误都转为带说明的响应，不会向宿主抛出
    pub async fn handle(&self, req: InvocationRequest) -> InvocationResponse {
        let tables = self.tables.current();
        let budget_ms = tables.timeouts.budget_ms(req.event_type);
        let budget = Duration::from_millis(budget_ms);
        let scope = InvocationScope::new(req.session_id.clone(), budget);

        tracing::info!(
            session_id = %req.session_id,
            event = req.event_type.as_str(),
            budget_ms,
            tables = tables.version,
            "invocation"
        );

        let response = match tokio::time::timeout(budget, self.dispatch(&tables, &req, &scope)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %req.session_id, error = %e, "invocation failed");
                let mut resp = InvocationResponse::ok();
                resp.status = Status::Degraded;
                resp.gate_results.push(GateResult::fail(
                    GateStage::Post,
                    Severity::Error,
                    "core.error",
                    e.to_string(),
                ));
                resp.requires_acknowledgment = true;
                resp
            }
            Err(_) => {
                scope.cancel();
                tracing::warn!(session_id = %req.session_id, budget_ms, "invocation budget exhausted");
                let mut resp = InvocationResponse::ok();
                resp.status = Status::Degraded;
                resp.gate_results.push(GateResult::fail(
                    GateStage::Post,
                    Severity::Error,
                    "post.deadline",
                    format!(
                        "{} exceeded its {}ms budget; remaining work was not attempted",
                        req.event_type.as_str(),
                        budget_ms
                    ),
                ));
                resp.requires_acknowledgment = true;
                resp
            }
        };

        tracing::info!(
            session_id = %req.session_id,
            event = req.event_type.as_str(),
            status = response.status.as_str(),
            checkpoint = ?response.checkpoint_id,
            "invocation finished"
        );
        response
    }

    async fn dispatch(
        &self,
        tables: &RuntimeTables,
        req: &InvocationRequest,
        scope: &InvocationScope,
    ) -> Result<InvocationResponse, CoreError> {
        let store = self.store(&req.session_id).await?;
        let now = req.timestamp;
        let payload = &req.payload;

        match req.event_type {
            EventType::SessionStart => {
                let swept = store.sweep(now, &tables.retention).await?;
                let latest = store.latest_checkpoint().await?;
                let mut resp = InvocationResponse::ok();
                resp.recovered_checkpoint = latest.as_ref().map(RecoveredCheckpoint::from);
                resp.routing_summary = Some(format!(
                    "session start: swept {} checkpoints and {} records",
                    swept.checkpoints_removed, swept.records_removed
                ));
                Ok(resp)
            }
            EventType::PreOperation => self.pre_operation(tables, req, scope, &store).await,
            EventType::PostOperation => {
                let mut resp = InvocationResponse::ok();
                let reported_failure = payload
                    .outcome
                    .as_ref()
                    .map(|o| matches!(o.status.as_str(), "failed" | "timed_out"))
                    .unwrap_or(false);
                if let Some(o) = &payload.outcome {
                    let event = OutcomeEvent {
                        timestamp: now,
                        session_id: req.session_id.clone(),
                        request_id: String::new(),
                        task_type: "reported".into(),
                        domain: "any".into(),
                        step: if o.step.is_empty() { "host".into() } else { o.step.clone() },
                        provider: o.provider.clone(),
                        status: o.status.clone(),
                        fallback_used: o.fallback_used,
                        duration_ms: o.duration_ms,
                    };
                    self.log_outcomes(&[event]).await;
                }
                let error = payload.error.is_some() || reported_failure;
                if let Some(e) = &payload.error {
                    resp.gate_results.push(GateResult::fail(
                        GateStage::Post,
                        Severity::Warning,
                        "post.reported_error",
                        e.clone(),
                    ));
                }
                let input = TriggerInput {
                    high_priority_completed: payload.high_priority && !error,
                    error,
                    ..Self::base_trigger(payload, now)
                };
                resp.checkpoint_id = self.auto_checkpoint(tables, &store, input).await?;
                Ok(resp)
            }
            EventType::SubtaskStop => {
                let input = TriggerInput {
                    high_priority_completed: payload.high_priority && payload.error.is_none(),
                    error: payload.error.is_some(),
                    ..Self::base_trigger(payload, now)
                };
                let mut resp = InvocationResponse::ok();
                resp.checkpoint_id = self.auto_checkpoint(tables, &store, input).await?;
                Ok(resp)
            }
            EventType::Notification => {
                let input = Self::base_trigger(payload, now);
                let mut resp = InvocationResponse::ok();
                resp.checkpoint_id = self.auto_checkpoint(tables, &store, input).await?;
                Ok(resp)
            }
            EventType::PreCompaction => {
                let id = store.checkpoint_at(CheckpointReason::Risk, now).await?;
                let mut resp = InvocationResponse::ok();
                resp.checkpoint_id = Some(id);
                Ok(resp)
            }
            EventType::SessionStop => {
                let id = store.checkpoint_at(CheckpointReason::Manual, now).await?;
                let mut resp = InvocationResponse::ok();
                resp.checkpoint_id = Some(id);
                Ok(resp)
            }
        }
    }

    async fn pre_operation(
        &self,
        tables: &RuntimeTables,
        req: &InvocationRequest,
        scope: &InvocationScope,
        store: &MemoryStore,
    ) -> Result<InvocationResponse, CoreError> {
        let payload = &req.payload;
        let now = req.timestamp;
        let request = payload.to_request();
        let context = payload.context(&req.session_id);
        let mut resp = InvocationResponse::ok();
        let mut pre_results = Vec::new();

        // 检测；互斥 flag 作为 error 级门禁结果上报，随后忽略这两个 flag
        let scores = match tables.detector.detect(&request, &context) {
            Ok(s) => s,
            Err(CoreError::ConflictingFlags(a, b)) => {
                pre_results.push(GateResult::fail(
                    GateStage::Pre,
                    Severity::Error,
                    "pre.flags.conflict",
                    format!("mutually exclusive flags declared: {} and {}; both ignored", a, b),
                ));
                let stripped = request.without_flags(&[a.as_str(), b.as_str()]);
                tables.detector.detect(&stripped, &context)?
            }
            Err(e) => return Err(e),
        };
        let active = tables.detector.resolve(&scores);

        // 分区（上一分区持久化在会话元数据中，用于滞回）
        let last_zone = store
            .get_meta(META_LAST_ZONE)
            .await?
            .and_then(|z| ResourceZone::parse(&z));
        let mut manager = ResourceManager::new(tables.thresholds.clone(), last_zone);
        let zone = manager.current_zone(&context);
        store.set_meta(META_LAST_ZONE, zone.as_str()).await?;

        // 路由与计划
        let health = Arc::new(ProviderHealth::new(tables.routing.catalog().universal()));
        if tables.health_check {
            self.registry.check_health(tables.routing.catalog(), &health).await;
        }
        let decision = tables.routing.route(&request, &active, zone, &health);
        let plan = tables
            .routing
            .build_plan(&request, &decision, tables.detector.modes(), zone, &health);
        let policy = manager.adapt(zone, &plan);
        resp.routing_summary = Some(decision.summary());
        resp.zone = Some(zone);

        // 执行前门禁
        let input = GateInput {
            request: &request,
            zone,
            plan: Some(&plan),
            decision: Some(&decision),
            result: None,
        };
        let (_, results) = tables.gates.evaluate(GateStage::Pre, &input);
        pre_results.extend(results);
        let pre_outcome = aggregate(&pre_results);
        resp.gate_results.extend(pre_results);

        let phase = self.next_phase(store).await?;
        if pre_outcome.at_least(Severity::Critical) {
            resp.status = Status::Blocked;
            resp.requires_acknowledgment = true;
            self.persist_plan(store, now, phase, &request, &decision, &plan, None, Status::Blocked)
                .await?;
            tracing::warn!(session_id = %req.session_id, request_id = %request.id, "blocked by pre-execution gate");
            return Ok(resp);
        }

        // 重大操作在执行前先做风险检查点
        if tables.triggers.config().risk_enabled
            && tables.triggers.is_major(&request.operation_type, request.file_count())
        {
            resp.checkpoint_id = Some(store.checkpoint_at(CheckpointReason::Risk, now).await?);
        }

        // 执行；在途监控与执行并行，协调器结束后发送端随之释放，监控随即收尾
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = ExecutionCoordinator::new(self.registry.clone(), health.clone()).with_events(tx);
        let mut monitor = InFlightMonitor::new(
            tables.gate_config.slow_step_ratio,
            Duration::from_millis(tables.gate_config.monitor_interval_ms),
        );
        if tables.triggers.config().error_enabled {
            monitor = monitor.with_checkpoint(store.clone(), now);
        }
        let (result, report) = tokio::join!(
            async {
                let result = coordinator.execute(&plan, &policy, scope, &request.id).await;
                drop(coordinator);
                result
            },
            monitor.run(rx)
        );
        if report.checkpoint_id.is_some() {
            resp.checkpoint_id = report.checkpoint_id.clone();
        }
        resp.gate_results.extend(report.results);

        // 执行后门禁
        let input = GateInput {
            request: &request,
            zone,
            plan: Some(&plan),
            decision: Some(&decision),
            result: Some(&result),
        };
        let (post_outcome, post_results) = tables.gates.evaluate(GateStage::Post, &input);
        resp.gate_results.extend(post_results);

        let degraded = !result.failures().is_empty()
            || result.skipped().iter().any(|o| o.essential)
            || decision.any_degraded()
            || result.any_deadline_exceeded();
        if post_outcome.at_least(Severity::Critical) {
            resp.status = Status::Blocked;
        } else if degraded {
            resp.status = Status::Degraded;
        }
        resp.requires_acknowledgment = aggregate(&resp.gate_results).at_least(Severity::Error);
        resp = resp.with_execution(&result);

        self.persist_plan(store, now, phase, &request, &decision, &plan, Some(&result), resp.status)
            .await?;

        // 执行后的检查点：错误 > 高优先级任务完成 > 时间间隔
        let input = TriggerInput {
            high_priority_completed: payload.high_priority && result.essential_ok(),
            error: report.checkpoint_requested || !result.failures().is_empty(),
            ..Self::base_trigger(payload, now)
        };
        if let Some(id) = self.auto_checkpoint(tables, store, input).await? {
            resp.checkpoint_id = Some(id);
        }

        self.log_outcomes(&Self::outcome_events(&req.session_id, &request, &decision, &result, now))
            .await;
        Ok(resp)
    }

    /// 触发器输入的公共部分；risk 只在执行前评估，这里不带操作信息
    fn base_trigger(payload: &Payload, now: DateTime<Utc>) -> TriggerInput {
        TriggerInput {
            operation: String::new(),
            file_count: 0,
            high_priority_completed: false,
            error: false,
            last_checkpoint: None,
            elapsed_session_minutes: payload.elapsed_session_minutes,
            now: Some(now),
        }
    }

    /// 评估触发器；同时触发多个时只用最紧急的原因建一个检查点
    async fn auto_checkpoint(
        &self,
        tables: &RuntimeTables,
        store: &MemoryStore,
        mut input: TriggerInput,
    ) -> Result<Option<String>, CoreError> {
        input.last_checkpoint = store.last_checkpoint_at().await?;
        let fired = tables.triggers.evaluate(&input);
        let Some(reason) = fired.first().copied() else {
            return Ok(None);
        };
        let now = input.now.unwrap_or_else(Utc::now);
        let id = store.checkpoint_at(reason, now).await?;
        tracing::info!(session_id = %store.session_id(), checkpoint = %id, reason = %reason, "checkpoint");
        Ok(Some(id))
    }

    async fn next_phase(&self, store: &MemoryStore) -> Result<u32, CoreError> {
        let current: u32 = store
            .get_meta(META_PHASE_SEQ)
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        store.set_meta(META_PHASE_SEQ, &next.to_string()).await?;
        Ok(next)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_plan(
        &self,
        store: &MemoryStore,
        now: DateTime<Utc>,
        phase: u32,
        request: &Request,
        decision: &RoutingDecision,
        plan: &ExecutionPlan,
        result: Option<&ExecutionResult>,
        status: Status,
    ) -> Result<(), CoreError> {
        let plan_id = plan_key(now.timestamp_millis());
        store
            .write_at(
                &plan_id,
                json!({
                    "request_id": request.id,
                    "text": request.text,
                    "operation": request.operation_type,
                    "routing": decision.summary(),
                    "steps": plan.steps.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
                    "status": status.as_str(),
                }),
                RecordKind::Plan,
                now,
            )
            .await?;
        store
            .write_at(
                &phase_key(phase),
                json!({
                    "plan": plan_id,
                    "request_id": request.id,
                    "status": status.as_str(),
                }),
                RecordKind::Phase,
                now,
            )
            .await?;

        if let Some(result) = result {
            for (i, o) in result.outcomes.iter().enumerate() {
                store
                    .write_at(
                        &task_key(phase, i as u32 + 1),
                        json!({
                            "step": o.step_id,
                            "status": o.status.as_str(),
                            "provider": o.provider,
                            "fallback_used": o.fallback_used,
                            "essential": o.essential,
                            "reason": o.reason,
                        }),
                        RecordKind::Task,
                        now,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// 每次 provider 尝试一条事件（委派步骤由子步骤记录）
    fn outcome_events(
        session_id: &str,
        request: &Request,
        decision: &RoutingDecision,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Vec<OutcomeEvent> {
        let mut events = Vec::new();
        for o in result.flatten().into_iter().filter(|o| o.children.is_empty()) {
            for (i, a) in o.attempts.iter().enumerate() {
                events.push(OutcomeEvent {
                    timestamp: now,
                    session_id: session_id.to_string(),
                    request_id: request.id.clone(),
                    task_type: decision.task_type.as_str().to_string(),
                    domain: decision.domain.as_str().to_string(),
                    step: o.step_id.clone(),
                    provider: a.provider.clone(),
                    status: a.status.as_str().to_string(),
                    fallback_used: i > 0,
                    duration_ms: a.duration_ms,
                });
            }
            if o.attempts.is_empty() && o.status == StepStatus::Skipped {
                events.push(OutcomeEvent {
                    timestamp: now,
                    session_id: session_id.to_string(),
                    request_id: request.id.clone(),
                    task_type: decision.task_type.as_str().to_string(),
                    domain: decision.domain.as_str().to_string(),
                    step: o.step_id.clone(),
                    provider: String::new(),
                    status: StepStatus::Skipped.as_str().to_string(),
                    fallback_used: false,
                    duration_ms: 0,
                });
            }
        }
        events
    }

    /// 结果日志写失败不影响本次调用
    async fn log_outcomes(&self, events: &[OutcomeEvent]) {
        if let Err(e) = self.outcome_log.append_all(events).await {
            tracing::warn!(path = %self.outcome_log.path().display(), error = %e, "outcome log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let mut cfg = AppConfig::default();
        cfg.app.data_dir = dir.path().to_path_buf();
        let tables = TableHandle::from_config(&cfg, None).unwrap();
        let registry = ProviderRegistry::from_catalog(tables.current().routing.catalog());
        Orchestrator::new(tables, registry, dir.path())
    }

    fn pre(text: &str) -> InvocationRequest {
        InvocationRequest::new(EventType::PreOperation, "s1").with_payload(Payload {
            operation: "edit".into(),
            description: text.into(),
            target_paths: vec!["src/lib.rs".into()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_pre_operation_executes_and_persists() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let resp = orch.handle(pre("implement the cache eviction handler")).await;

        assert_eq!(resp.status, Status::Ok);
        assert!(resp.routing_summary.is_some());
        assert!(resp.steps.iter().any(|s| s.step_id == "execute" && s.status == "completed"));

        let store = orch.store("s1").await.unwrap();
        assert_eq!(store.list("plan_").await.unwrap().len(), 1);
        assert!(store.read("phase_1").await.unwrap().is_some());
        assert_eq!(store.get_meta(META_LAST_ZONE).await.unwrap().as_deref(), Some("green"));
        assert!(orch.outcome_log().path().exists());
    }

    #[tokio::test]
    async fn test_conflicting_flags_require_acknowledgment() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut req = pre("summarize the module layout");
        req.payload.flags = vec!["--uc".into(), "--verbose".into()];
        let resp = orch.handle(req).await;

        let conflict = resp
            .gate_results
            .iter()
            .find(|r| r.rule_id == "pre.flags.conflict")
            .unwrap();
        assert_eq!(conflict.severity, Severity::Error);
        assert!(resp.requires_acknowledgment);
        assert_ne!(resp.status, Status::Blocked);
    }

    #[tokio::test]
    async fn test_destructive_operation_on_protected_path_is_blocked() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let req = InvocationRequest::new(EventType::PreOperation, "s1").with_payload(Payload {
            operation: "delete".into(),
            description: "remove leaked credentials".into(),
            target_paths: vec!["deploy/.env".into()],
            ..Default::default()
        });
        let resp = orch.handle(req).await;
        assert_eq!(resp.status, Status::Blocked);
        assert_eq!(resp.status.exit_code(), 2);
        assert!(resp.steps.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_checkpoints() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let compaction = orch
            .handle(InvocationRequest::new(EventType::PreCompaction, "s2"))
            .await;
        assert!(compaction.checkpoint_id.is_some());

        let stop = orch
            .handle(InvocationRequest::new(EventType::SessionStop, "s2"))
            .await;
        assert!(stop.checkpoint_id.is_some());
        assert_ne!(stop.checkpoint_id, compaction.checkpoint_id);

        let start = orch
            .handle(InvocationRequest::new(EventType::SessionStart, "s2"))
            .await;
        let recovered = start.recovered_checkpoint.unwrap();
        assert_eq!(Some(recovered.id), stop.checkpoint_id);
        assert_eq!(recovered.reason, "manual");
    }

    #[tokio::test]
    async fn test_post_operation_error_fires_checkpoint() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let req = InvocationRequest::new(EventType::PostOperation, "s3").with_payload(Payload {
            error: Some("write failed: disk full".into()),
            ..Default::default()
        });
        let resp = orch.handle(req).await;
        assert!(resp.checkpoint_id.is_some());
        let store = orch.store("s3").await.unwrap();
        let cp = store.latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.reason, CheckpointReason::Error);
    }

    #[tokio::test]
    async fn test_notification_without_elapsed_time_is_noop() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let resp = orch
            .handle(InvocationRequest::new(EventType::Notification, "s4"))
            .await;
        assert_eq!(resp.status, Status::Ok);
        assert!(resp.checkpoint_id.is_none());
    }

    #[tokio::test]
    async fn test_subtask_stop_checkpoints_only_high_priority_success() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let stop = |session: &str, high_priority: bool, error: Option<&str>| {
            InvocationRequest::new(EventType::SubtaskStop, session).with_payload(Payload {
                high_priority,
                error: error.map(str::to_string),
                ..Default::default()
            })
        };

        let resp = orch.handle(stop("s5", false, None)).await;
        assert!(resp.checkpoint_id.is_none());
        let store = orch.store("s5").await.unwrap();
        assert!(store.latest_checkpoint().await.unwrap().is_none());

        let resp = orch.handle(stop("s6", true, None)).await;
        assert!(resp.checkpoint_id.is_some());
        let cp = orch.store("s6").await.unwrap().latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.reason, CheckpointReason::Task);

        // 失败的高优先级子任务只记错误检查点
        orch.handle(stop("s7", true, Some("subtask crashed"))).await;
        let cp = orch.store("s7").await.unwrap().latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.reason, CheckpointReason::Error);
    }

    #[tokio::test]
    async fn test_red_zone_validation_runs_on_universal_provider() {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.data_dir = dir.path().to_path_buf();
        cfg.routing.validation_provider = "deep-reasoning".into();
        let tables = TableHandle::from_config(&cfg, None).unwrap();
        let registry = ProviderRegistry::from_catalog(tables.current().routing.catalog());
        let orch = Orchestrator::new(tables, registry, dir.path());

        let mut req = pre("review the session cache for stale entries");
        req.payload.flags = vec!["--safe-mode".into()];
        req.payload.resource_usage_percent = 97.0;
        let resp = orch.handle(req).await;

        assert_eq!(resp.zone, Some(ResourceZone::Red));
        let validate = resp.steps.iter().find(|s| s.step_id == "validate").unwrap();
        assert_eq!(validate.provider.as_deref(), Some("native"));
        assert_eq!(validate.attempted, vec!["native".to_string()]);
        for step in &resp.steps {
            assert!(step.attempted.iter().all(|p| p == "native"), "{} left the universal provider", step.step_id);
        }
    }
}
