//! 执行协调器
//!
//! 按计划执行步骤：顺序链、有界并行组、分层委派。每次 provider 调用都有硬超时
//! （min(步骤超时, 调用剩余预算)），失败或超时时按 RecoveryEngine 的建议切换回退 provider，
//! 并输出结构化审计日志（JSON）。计划只读，不会被修改。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::core::{ConcurrencyLimiter, CoreError, InvocationScope, RecoveryAction, RecoveryEngine};
use crate::execution::graph::StepGraph;
use crate::execution::outcome::{Attempt, ExecutionResult, StepOutcome, StepStatus};
use crate::execution::provider::{ProviderRegistry, StepTask};
use crate::resource::ExecutionPolicy;
use crate::routing::{ExecutionPlan, PlanMode, ProviderHealth, Step, StepKind};

/// 执行过程事件，供在途监控消费
#[derive(Debug, Clone)]
pub enum StepEvent {
    Started {
        step_id: String,
        provider: String,
        timeout_ms: u64,
    },
    Finished {
        step_id: String,
        provider: String,
        status: StepStatus,
        duration_ms: u64,
    },
}

/// 一次执行共享的上下文
struct RunCtx<'a> {
    policy: &'a ExecutionPolicy,
    limiter: ConcurrencyLimiter,
    request_id: &'a str,
}

/// 执行协调器
#[derive(Clone)]
pub struct ExecutionCoordinator {
    registry: Arc<ProviderRegistry>,
    health: Arc<ProviderHealth>,
    recovery: Arc<RecoveryEngine>,
    events: Option<mpsc::UnboundedSender<StepEvent>>,
}

impl ExecutionCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<ProviderHealth>) -> Self {
        Self {
            registry,
            health,
            recovery: Arc::new(RecoveryEngine::new()),
            events: None,
        }
    }

    /// 订阅步骤事件（在途监控）
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<StepEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    /// 执行整个计划树；并发上限在整棵树上共享
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        policy: &ExecutionPolicy,
        scope: &InvocationScope,
        request_id: &str,
    ) -> ExecutionResult {
        let ctx = RunCtx {
            policy,
            limiter: ConcurrencyLimiter::new(policy.concurrency_ceiling),
            request_id,
        };
        tracing::info!(
            plan = %plan.id,
            steps = plan.total_steps(),
            ceiling = policy.concurrency_ceiling,
            zone = policy.zone.as_str(),
            "executing plan"
        );
        let result = self.run_plan(plan, &ctx, scope.clone()).await;
        tracing::info!(
            plan = %plan.id,
            peak_in_flight = ctx.limiter.peak(),
            failures = result.failures().len(),
            skipped = result.skipped().len(),
            "plan finished"
        );
        result
    }

    fn run_plan<'a>(
        &'a self,
        plan: &'a ExecutionPlan,
        ctx: &'a RunCtx<'a>,
        scope: InvocationScope,
    ) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(async move {
            match plan.mode {
                PlanMode::Sequential { break_on_error } => {
                    self.run_sequential(plan, break_on_error, ctx, &scope).await
                }
                PlanMode::Parallel { all_or_nothing } => {
                    self.run_parallel(plan, all_or_nothing, ctx, &scope).await
                }
            }
        })
    }

    async fn run_sequential(
        &self,
        plan: &ExecutionPlan,
        break_on_error: bool,
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
    ) -> ExecutionResult {
        let mut outcomes = Vec::with_capacity(plan.steps.len());
        let mut completed: HashSet<&str> = HashSet::new();
        let mut halted_by: Option<&str> = None;

        for step in &plan.steps {
            if let Some(by) = halted_by {
                outcomes.push(StepOutcome::skipped(
                    &step.id,
                    step.essential,
                    format!("chain halted after step {} failed", by),
                ));
                continue;
            }
            if let Some(reason) = self.precheck(step, ctx, scope, |d| completed.contains(d)) {
                tracing::info!(step = %step.id, reason = %reason, "step skipped");
                outcomes.push(StepOutcome::skipped(&step.id, step.essential, reason));
                continue;
            }

            let outcome = self.run_step(step, ctx, scope).await;
            if outcome.status == StepStatus::Completed {
                completed.insert(step.id.as_str());
            } else if break_on_error && step.essential && outcome.status.is_failure() {
                halted_by = Some(step.id.as_str());
            }
            outcomes.push(outcome);
        }

        let deadline_exceeded =
            scope.is_expired() && outcomes.iter().any(|o| o.status != StepStatus::Completed);
        ExecutionResult {
            plan_id: plan.id.clone(),
            outcomes,
            halted: halted_by.is_some(),
            deadline_exceeded,
        }
    }

    async fn run_parallel(
        &self,
        plan: &ExecutionPlan,
        all_or_nothing: bool,
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
    ) -> ExecutionResult {
        let mut graph = StepGraph::new(&plan.steps);
        let group = scope.child();
        let mut results: HashMap<String, StepOutcome> = HashMap::new();
        let mut started: HashSet<String> = HashSet::new();
        let mut first_failure: Option<String> = None;

        for step in &plan.steps {
            if let Some(missing) = graph.dangling(&step.id) {
                started.insert(step.id.clone());
                results.insert(
                    step.id.clone(),
                    StepOutcome::skipped(
                        &step.id,
                        step.essential,
                        format!("unknown dependency: {}", missing.join(", ")),
                    ),
                );
            }
        }

        let mut queue = graph.ready(&started);
        let mut running = FuturesUnordered::new();
        loop {
            for id in std::mem::take(&mut queue) {
                if !started.insert(id.clone()) {
                    continue;
                }
                let Some(step) = plan.step(&id) else {
                    continue;
                };
                if let Some(reason) = self.precheck(step, ctx, &group, |_| true) {
                    results.insert(id.clone(), StepOutcome::skipped(&id, step.essential, reason));
                    self.block_dependents(plan, &graph, &id, &mut started, &mut results);
                    continue;
                }
                let scope = group.clone();
                running.push(async move {
                    let outcome = self.run_step(step, ctx, &scope).await;
                    (step.id.clone(), outcome)
                });
            }

            let Some((id, outcome)) = running.next().await else {
                break;
            };
            if outcome.status == StepStatus::Completed {
                queue.extend(graph.mark_completed(&id));
            } else {
                self.block_dependents(plan, &graph, &id, &mut started, &mut results);
                if all_or_nothing && outcome.status.is_failure() && first_failure.is_none() {
                    tracing::warn!(step = %id, "all-or-nothing group failed, cancelling siblings");
                    first_failure = Some(id.clone());
                    group.cancel();
                }
            }
            results.insert(id, outcome);
        }

        let mut outcomes = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let mut outcome = results.remove(&step.id).unwrap_or_else(|| {
                StepOutcome::skipped(&step.id, step.essential, "dependency cycle")
            });
            if let Some(failed) = &first_failure {
                if outcome.step_id != *failed && outcome.reason.as_deref() == Some("cancelled") {
                    outcome.reason = Some(format!("cancelled after sibling {} failed", failed));
                }
            }
            outcomes.push(outcome);
        }

        let deadline_exceeded =
            scope.is_expired() && outcomes.iter().any(|o| o.status != StepStatus::Completed);
        ExecutionResult {
            plan_id: plan.id.clone(),
            outcomes,
            halted: first_failure.is_some(),
            deadline_exceeded,
        }
    }

    fn block_dependents(
        &self,
        plan: &ExecutionPlan,
        graph: &StepGraph,
        failed: &str,
        started: &mut HashSet<String>,
        results: &mut HashMap<String, StepOutcome>,
    ) {
        for id in graph.blocked_by(failed) {
            if started.insert(id.clone()) {
                let essential = plan.step(&id).map(|s| s.essential).unwrap_or(true);
                results.insert(
                    id.clone(),
                    StepOutcome::skipped(&id, essential, format!("dependency {} did not complete", failed)),
                );
            }
        }
    }

    /// 步骤开始前的检查；返回跳过原因
    fn precheck(
        &self,
        step: &Step,
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
        dependency_done: impl Fn(&str) -> bool,
    ) -> Option<String> {
        if scope.is_cancelled() {
            return Some("cancelled".into());
        }
        if scope.is_expired() {
            return Some("invocation deadline exceeded".into());
        }
        if ctx.policy.skip_non_essential && !step.essential {
            return Some(format!(
                "resource zone {}: non-essential step skipped",
                ctx.policy.zone.as_str()
            ));
        }
        step.depends_on
            .iter()
            .find(|d| !dependency_done(d.as_str()))
            .map(|d| format!("dependency {} did not complete", d))
    }

    fn run_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a RunCtx<'a>,
        scope: &'a InvocationScope,
    ) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let start = Instant::now();
            let mut outcome = match &step.kind {
                StepKind::Provider { provider, fallbacks } => {
                    self.run_provider_step(step, provider, fallbacks, ctx, scope).await
                }
                StepKind::Delegate { children, optional } => {
                    self.run_delegate(step, children, *optional, ctx, scope).await
                }
            };
            outcome.duration_ms = start.elapsed().as_millis() as u64;
            if outcome.status.is_failure() {
                tracing::warn!(step = %step.id, outcome = %outcome.describe(), "step did not complete");
            } else {
                tracing::debug!(step = %step.id, outcome = %outcome.describe(), "step finished");
            }
            outcome
        })
    }

    async fn run_provider_step(
        &self,
        step: &Step,
        primary: &str,
        fallbacks: &[String],
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::pending(&step.id, step.essential);
        outcome.status = StepStatus::Running;

        let mut candidates: Vec<&str> = vec![primary];
        for f in fallbacks {
            if !candidates.contains(&f.as_str()) {
                candidates.push(f.as_str());
            }
        }
        let step_timeout = Duration::from_millis(step.timeout_ms.max(1));
        let cancel = scope.cancel_token();
        let mut last_error: Option<String> = None;

        for (i, name) in candidates.iter().copied().enumerate() {
            if !self.health.is_available(name) {
                let why = self.health.reason(name).unwrap_or_else(|| "unavailable".into());
                outcome.attempts.push(Attempt {
                    provider: name.to_string(),
                    status: StepStatus::Skipped,
                    error: Some(format!("unavailable: {}", why)),
                    duration_ms: 0,
                });
                continue;
            }

            let task = StepTask {
                request_id: ctx.request_id.to_string(),
                session_id: scope.session_id().to_string(),
                step_id: step.id.clone(),
                instruction: step.instruction.clone(),
                target_paths: step.target_paths.clone(),
                compression: ctx.policy.compression,
                attempt: i,
            };
            let t0 = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CoreError::Cancelled),
                r = self.attempt_once(step, name, &task, step_timeout, ctx, scope) => r,
            };
            let duration_ms = t0.elapsed().as_millis() as u64;

            let status = match &result {
                Ok(_) => StepStatus::Completed,
                Err(CoreError::ProviderTimeout(_)) | Err(CoreError::DeadlineExceeded) => {
                    StepStatus::TimedOut
                }
                Err(_) => StepStatus::Failed,
            };
            self.audit(&step.id, name, i, &result, duration_ms);
            self.emit(StepEvent::Finished {
                step_id: step.id.clone(),
                provider: name.to_string(),
                status,
                duration_ms,
            });

            outcome.provider = Some(name.to_string());
            outcome.status = status;
            match result {
                Ok(out) => {
                    outcome.attempts.push(Attempt {
                        provider: name.to_string(),
                        status,
                        error: None,
                        duration_ms,
                    });
                    outcome.output = Some(out);
                    outcome.fallback_used = name != primary;
                    return outcome;
                }
                Err(err) => {
                    outcome.attempts.push(Attempt {
                        provider: name.to_string(),
                        status,
                        error: Some(err.to_string()),
                        duration_ms,
                    });
                    if matches!(
                        err,
                        CoreError::ProviderFailed { .. }
                            | CoreError::ProviderTimeout(_)
                            | CoreError::UnknownProvider(_)
                    ) {
                        self.health.mark_unavailable(name, err.to_string());
                    }
                    let has_next = candidates[i + 1..]
                        .iter()
                        .any(|c| self.health.is_available(c));
                    last_error = Some(err.to_string());
                    match self.recovery.handle(&err, has_next) {
                        RecoveryAction::FallbackToNext => {
                            tracing::warn!(step = %step.id, provider = name, error = %err, "falling back to next provider");
                            continue;
                        }
                        RecoveryAction::SkipAndReport(msg) => {
                            outcome.reason = Some(msg);
                            break;
                        }
                        RecoveryAction::Abort => {
                            outcome.reason = Some(match err {
                                CoreError::Cancelled => "cancelled".to_string(),
                                other => other.to_string(),
                            });
                            break;
                        }
                    }
                }
            }
        }

        if outcome.status == StepStatus::Running {
            outcome.status = StepStatus::Failed;
        }
        if outcome.reason.is_none() {
            outcome.reason = Some(match last_error {
                Some(e) => format!("fallback chain exhausted; last error: {}", e),
                None => "fallback chain exhausted: no available provider".to_string(),
            });
        }
        outcome
    }

    /// 对单个 provider 的一次调用：先取并发许可，再在剩余预算内执行
    async fn attempt_once(
        &self,
        step: &Step,
        name: &str,
        task: &StepTask,
        step_timeout: Duration,
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
    ) -> Result<String, CoreError> {
        let provider = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::UnknownProvider(name.to_string()))?;
        let _permit = match timeout(scope.remaining(), ctx.limiter.acquire()).await {
            Ok(permit) => permit?,
            Err(_) => return Err(CoreError::DeadlineExceeded),
        };
        let budget = scope.step_budget(step_timeout);
        if budget.is_zero() {
            return Err(CoreError::DeadlineExceeded);
        }
        self.emit(StepEvent::Started {
            step_id: step.id.clone(),
            provider: name.to_string(),
            timeout_ms: budget.as_millis() as u64,
        });
        match timeout(budget, provider.execute(task)).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(reason)) => Err(CoreError::ProviderFailed {
                provider: name.to_string(),
                reason,
            }),
            Err(_) if budget < step_timeout => Err(CoreError::DeadlineExceeded),
            Err(_) => Err(CoreError::ProviderTimeout(name.to_string())),
        }
    }

    async fn run_delegate(
        &self,
        step: &Step,
        children: &[ExecutionPlan],
        optional: bool,
        ctx: &RunCtx<'_>,
        scope: &InvocationScope,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::pending(&step.id, step.essential);
        let budget = scope.step_budget(Duration::from_millis(step.timeout_ms.max(1)));
        let runs = children
            .iter()
            .map(|child| self.run_plan(child, ctx, scope.child()));

        let results = match timeout(budget, join_all(runs)).await {
            Ok(results) => results,
            Err(_) => {
                outcome.status = StepStatus::TimedOut;
                outcome.reason = Some("delegated sub-plans exceeded their time budget".into());
                return outcome;
            }
        };

        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.essential_ok())
            .map(|r| r.plan_id.clone())
            .collect();
        if failed.is_empty() {
            outcome.status = StepStatus::Completed;
        } else if optional {
            outcome.status = StepStatus::Completed;
            outcome.reason = Some(format!("optional sub-plans failed: {}", failed.join(", ")));
        } else {
            outcome.status = StepStatus::Failed;
            outcome.reason = Some(format!("sub-plans failed: {}", failed.join(", ")));
        }
        outcome.children = results;
        outcome
    }

    fn emit(&self, event: StepEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn audit(
        &self,
        step: &str,
        provider: &str,
        attempt: usize,
        result: &Result<String, CoreError>,
        duration_ms: u64,
    ) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(CoreError::ProviderTimeout(_)) | Err(CoreError::DeadlineExceeded) => "timeout",
            Err(CoreError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "provider_audit",
            "provider": provider,
            "step": step,
            "attempt": attempt,
            "outcome": outcome,
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::provider::{NativeProvider, Provider};
    use crate::resource::{Compression, ProviderFilter, ResourceZone};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Mock {
        name: String,
        delay: Duration,
        fail: bool,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Mock {
        fn ok(name: &str, delay_ms: u64) -> Self {
            Self {
                name: name.into(),
                delay: Duration::from_millis(delay_ms),
                fail: false,
                live: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name, 0)
            }
        }
    }

    #[async_trait]
    impl Provider for Mock {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, task: &StepTask) -> Result<String, String> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.live.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(format!("{} refused {}", self.name, task.step_id))
            } else {
                Ok(format!("{} did {}", self.name, task.step_id))
            }
        }
    }

    fn coordinator(providers: Vec<Mock>) -> ExecutionCoordinator {
        let mut registry = ProviderRegistry::new();
        registry.register(NativeProvider::new("native"));
        for p in providers {
            registry.register(p);
        }
        ExecutionCoordinator::new(Arc::new(registry), Arc::new(ProviderHealth::new("native")))
    }

    fn policy(ceiling: usize) -> ExecutionPolicy {
        ExecutionPolicy {
            zone: ResourceZone::Green,
            concurrency_ceiling: ceiling,
            provider_filter: ProviderFilter::All,
            compression: Compression::None,
            skip_non_essential: false,
        }
    }

    fn scope() -> InvocationScope {
        InvocationScope::new("s", Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_fallback_on_failure() {
        let c = coordinator(vec![Mock::failing("a"), Mock::ok("b", 0)]);
        let plan = ExecutionPlan::sequential(
            "p",
            vec![Step::provider("execute", "a", 1000).with_fallbacks(vec!["b".into(), "native".into()])],
        );
        let r = c.execute(&plan, &policy(2), &scope(), "r").await;
        let o = r.outcome("execute").unwrap();
        assert_eq!(o.status, StepStatus::Completed);
        assert_eq!(o.provider.as_deref(), Some("b"));
        assert!(o.fallback_used);
        assert_eq!(o.attempts.len(), 2);
        assert!(!c.health().is_available("a"));
    }

    #[tokio::test]
    async fn test_break_on_error_halts_chain() {
        let c = coordinator(vec![Mock::failing("a"), Mock::ok("b", 0)]);
        let plan = ExecutionPlan::sequential(
            "p",
            vec![Step::provider("one", "a", 1000), Step::provider("two", "b", 1000)],
        );
        let r = c.execute(&plan, &policy(1), &scope(), "r").await;
        assert_eq!(r.outcomes[0].status, StepStatus::Failed);
        assert!(r.outcomes[0].reason.as_deref().unwrap().contains("a"));
        assert_eq!(r.outcomes[1].status, StepStatus::Skipped);
        assert!(r.halted);
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel_siblings() {
        let c = coordinator(vec![Mock::ok("slow", 2_000), Mock::ok("fast", 10)]);
        let plan = ExecutionPlan::parallel(
            "p",
            vec![
                Step::provider("s1", "fast", 1000),
                Step::provider("s2", "slow", 50),
                Step::provider("s3", "fast", 1000),
            ],
        );
        let r = c.execute(&plan, &policy(3), &scope(), "r").await;
        assert_eq!(r.outcome("s1").unwrap().status, StepStatus::Completed);
        assert_eq!(r.outcome("s2").unwrap().status, StepStatus::TimedOut);
        assert_eq!(r.outcome("s3").unwrap().status, StepStatus::Completed);
        assert_eq!(r.failures().len(), 1);
        assert!(!r.halted);
    }

    #[tokio::test]
    async fn test_parallel_respects_ceiling() {
        let mock = Mock::ok("p", 30);
        let peak = mock.peak.clone();
        let c = coordinator(vec![mock]);
        let steps = (0..6)
            .map(|i| Step::provider(format!("s{i}"), "p", 1000))
            .collect();
        let plan = ExecutionPlan::parallel("p", steps);
        let r = c.execute(&plan, &policy(2), &scope(), "r").await;
        assert!(r.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_red_zone_skips_non_essential() {
        let c = coordinator(vec![]);
        let plan = ExecutionPlan::sequential(
            "p",
            vec![
                Step::provider("clarify", "native", 1000).non_essential(),
                Step::provider("execute", "native", 1000),
            ],
        );
        let mut red = policy(1);
        red.zone = ResourceZone::Red;
        red.skip_non_essential = true;
        let r = c.execute(&plan, &red, &scope(), "r").await;
        assert_eq!(r.outcomes[0].status, StepStatus::Skipped);
        assert!(r.outcomes[0].reason.as_deref().unwrap().contains("red"));
        assert_eq!(r.outcomes[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_all_or_nothing_cancels_siblings() {
        let c = coordinator(vec![Mock::failing("bad"), Mock::ok("slow", 2_000)]);
        let plan = ExecutionPlan::parallel(
            "p",
            vec![Step::provider("long", "slow", 5_000), Step::provider("boom", "bad", 1000)],
        )
        .with_mode(PlanMode::Parallel { all_or_nothing: true });
        let r = c.execute(&plan, &policy(2), &scope(), "r").await;
        assert_eq!(r.outcome("boom").unwrap().status, StepStatus::Failed);
        let long = r.outcome("long").unwrap();
        assert_eq!(long.status, StepStatus::Failed);
        assert!(long.reason.as_deref().unwrap().contains("sibling boom"));
        assert!(r.halted);
    }

    #[tokio::test]
    async fn test_parallel_dependents_are_skipped() {
        let c = coordinator(vec![Mock::failing("bad"), Mock::ok("good", 0)]);
        let plan = ExecutionPlan::parallel(
            "p",
            vec![
                Step::provider("a", "bad", 1000),
                Step::provider("b", "good", 1000).depends_on(&["a"]),
                Step::provider("c", "good", 1000),
            ],
        );
        let r = c.execute(&plan, &policy(3), &scope(), "r").await;
        assert_eq!(r.outcome("b").unwrap().status, StepStatus::Skipped);
        assert_eq!(r.outcome("c").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_delegation_aggregates_child_failure() {
        let c = coordinator(vec![Mock::failing("bad"), Mock::ok("good", 0)]);
        let children = vec![
            ExecutionPlan::sequential("child.ok", vec![Step::provider("x", "good", 1000)]),
            ExecutionPlan::sequential("child.bad", vec![Step::provider("y", "bad", 1000)]),
        ];
        let plan = ExecutionPlan::sequential(
            "p",
            vec![Step::delegate("split", children.clone(), 5_000)],
        );
        let r = c.execute(&plan, &policy(2), &scope(), "r").await;
        let split = r.outcome("split").unwrap();
        assert_eq!(split.status, StepStatus::Failed);
        assert!(split.reason.as_deref().unwrap().contains("child.bad"));
        assert_eq!(split.children.len(), 2);
        assert_eq!(r.flatten().len(), 3);

        let c = coordinator(vec![Mock::failing("bad"), Mock::ok("good", 0)]);
        let optional = ExecutionPlan::sequential(
            "p",
            vec![Step::delegate("split", children, 5_000).optional_subtree()],
        );
        let r = c.execute(&optional, &policy(2), &scope(), "r").await;
        assert_eq!(r.outcome("split").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_deadline_bounds_every_step() {
        let c = coordinator(vec![Mock::ok("slow", 5_000)]);
        let plan = ExecutionPlan::sequential(
            "p",
            vec![
                Step::provider("one", "slow", 30_000).with_fallbacks(vec!["native".into()]),
                Step::provider("two", "native", 1000),
            ],
        );
        let scope = InvocationScope::new("s", Duration::from_millis(100));
        let started = Instant::now();
        let r = c.execute(&plan, &policy(1), &scope, "r").await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(r.outcomes[0].status, StepStatus::TimedOut);
        assert_eq!(r.outcomes[1].status, StepStatus::Skipped);
        assert!(r.deadline_exceeded);
    }
}
