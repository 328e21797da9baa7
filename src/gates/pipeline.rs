//! 门禁流水线：按阶段运行已注册的规则

use std::sync::Arc;

use crate::core::{CoreError, Request};
use crate::execution::ExecutionResult;
use crate::gates::rules::{
    CompletenessRule, DeadlineRule, DependencyRule, FallbackRule, OutputRule, ProtectedPathRule,
    ResourceRule, RoutingRule, ScopeRule,
};
use crate::gates::{aggregate, GateConfig, GateOutcome, GateResult, GateRule, GateStage};
use crate::resource::ResourceZone;
use crate::routing::{ExecutionPlan, RoutingDecision};

/// 门禁规则的输入；执行前阶段 result 为 None
pub struct GateInput<'a> {
    pub request: &'a Request,
    pub zone: ResourceZone,
    pub plan: Option<&'a ExecutionPlan>,
    pub decision: Option<&'a RoutingDecision>,
    pub result: Option<&'a ExecutionResult>,
}

/// 门禁流水线
#[derive(Clone, Default)]
pub struct GatePipeline {
    rules: Vec<Arc<dyn GateRule>>,
}

impl GatePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置注册全部内置规则
    pub fn from_config(config: &GateConfig) -> Result<Self, CoreError> {
        let protected = ProtectedPathRule::new(&config.protected_paths, &config.destructive_operations)?;
        Ok(Self::new()
            .with_rule(ScopeRule {
                warn_files: config.scope_warn_files,
                error_files: config.scope_error_files,
            })
            .with_rule(ResourceRule)
            .with_rule(DependencyRule)
            .with_rule(protected)
            .with_rule(RoutingRule)
            .with_rule(CompletenessRule)
            .with_rule(FallbackRule)
            .with_rule(DeadlineRule)
            .with_rule(OutputRule))
    }

    pub fn with_rule(mut self, rule: impl GateRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn rule_ids(&self, stage: GateStage) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.stage() == stage)
            .map(|r| r.id())
            .collect()
    }

    /// 运行某阶段的所有规则；结果按规则 ID 排序，与注册顺序无关
    pub fn evaluate(&self, stage: GateStage, input: &GateInput<'_>) -> (GateOutcome, Vec<GateResult>) {
        let mut results: Vec<GateResult> = self
            .rules
            .iter()
            .filter(|r| r.stage() == stage)
            .map(|r| r.evaluate(input))
            .collect();
        results.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        for r in results.iter().filter(|r| !r.passed) {
            tracing::debug!(
                stage = stage.as_str(),
                rule = %r.rule_id,
                severity = r.severity.as_str(),
                "{}",
                r.message
            );
        }
        (aggregate(&results), results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::Severity;

    struct Always(&'static str, Severity);

    impl GateRule for Always {
        fn id(&self) -> &str {
            self.0
        }

        fn stage(&self) -> GateStage {
            GateStage::Pre
        }

        fn evaluate(&self, _input: &GateInput<'_>) -> GateResult {
            GateResult::fail(GateStage::Pre, self.1, self.0, "always")
        }
    }

    fn input(request: &Request) -> GateInput<'_> {
        GateInput {
            request,
            zone: ResourceZone::Green,
            plan: None,
            decision: None,
            result: None,
        }
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let req = Request::new("x");
        let a = GatePipeline::new()
            .with_rule(Always("b", Severity::Warning))
            .with_rule(Always("a", Severity::Critical));
        let b = GatePipeline::new()
            .with_rule(Always("a", Severity::Critical))
            .with_rule(Always("b", Severity::Warning));
        let (oa, ra) = a.evaluate(GateStage::Pre, &input(&req));
        let (ob, rb) = b.evaluate(GateStage::Pre, &input(&req));
        assert_eq!(oa, GateOutcome::Fail(Severity::Critical));
        assert_eq!(oa, ob);
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_stage_filtering() {
        let pipeline = GatePipeline::from_config(&GateConfig::default()).unwrap();
        let pre = pipeline.rule_ids(GateStage::Pre);
        assert!(pre.contains(&"pre.scope"));
        assert!(!pre.contains(&"post.fallback"));

        let req = Request::new("look at this");
        let (outcome, results) = pipeline.evaluate(GateStage::Post, &input(&req));
        assert_eq!(outcome, GateOutcome::Pass);
        assert!(results.iter().all(|r| r.stage == GateStage::Post));
    }
}
