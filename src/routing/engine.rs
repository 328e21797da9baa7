//! 路由引擎：检测结果 + 资源分区 → RoutingDecision → ExecutionPlan
//!
//! 选择顺序：主 provider（置信度达标且可用）→ 回退链中第一个可用者 → 兜底 provider。
//! 回退链永远不会解析为空。

use std::collections::HashMap;

use serde::Serialize;

use crate::core::Request;
use crate::detector::{ActivationScore, Mode, ModeTable};
use crate::resource::{ProviderFilter, ResourceManager, ResourceZone};
use crate::routing::{
    Classification, DecisionMatrix, DomainTag, ExecutionPlan, MatrixRow, PlanMode, ProviderCatalog,
    ProviderHealth, Step, TaskClassifier, TaskType,
};

/// 被排除的候选 provider 及原因（「已消耗」的回退链部分）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedProvider {
    pub provider: String,
    pub reason: String,
}

/// 按领域拆分出的子路由
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubRoute {
    pub domain: DomainTag,
    pub paths: Vec<String>,
    pub decision: RoutingDecision,
}

/// 路由决策（每个请求生成一次，之后只读）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub selected_provider: String,
    /// 选中者之后仍可用的候选，末尾总是兜底 provider
    pub fallback_chain: Vec<String>,
    pub excluded: Vec<ExcludedProvider>,
    pub concurrency_hint: usize,
    pub parallelizable: bool,
    pub activated_modes: Vec<Mode>,
    pub confidence: f64,
    pub task_type: TaskType,
    pub domain: DomainTag,
    pub timeout_ms: u64,
    /// 配置的候选全部不可用，只能落到兜底 provider
    pub degraded: bool,
    pub subtasks: Vec<SubRoute>,
}

impl RoutingDecision {
    /// 一行摘要，写入响应的 routingSummary
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{}/{} -> {} (fallback: {}), confidence {:.2}",
            self.task_type.as_str(),
            self.domain.as_str(),
            self.selected_provider,
            self.fallback_chain.join(" -> "),
            self.confidence
        );
        if !self.activated_modes.is_empty() {
            let modes: Vec<&str> = self.activated_modes.iter().map(|m| m.as_str()).collect();
            s.push_str(&format!(", modes: {}", modes.join(", ")));
        }
        if !self.subtasks.is_empty() {
            let subs: Vec<String> = self
                .subtasks
                .iter()
                .map(|s| format!("{}:{}", s.domain.as_str(), s.decision.selected_provider))
                .collect();
            s.push_str(&format!(", split: [{}]", subs.join(", ")));
        }
        if self.degraded {
            s.push_str(", degraded");
        }
        s
    }

    /// 整棵决策树是否有任一处降级
    pub fn any_degraded(&self) -> bool {
        self.degraded || self.subtasks.iter().any(|s| s.decision.any_degraded())
    }
}

/// 路由引擎的可调参数
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub default_timeout_ms: u64,
    /// 文件领域数达到该值时按领域拆分
    pub split_min_domains: usize,
    /// SafeValidation 等模式追加的验证步骤所用 provider
    pub validation_provider: String,
    pub break_on_error: bool,
}

/// 路由引擎（矩阵与目录在整表热更新时一起替换）
pub struct RoutingEngine {
    matrix: DecisionMatrix,
    catalog: ProviderCatalog,
    classifier: TaskClassifier,
    hints: HashMap<Mode, TaskType>,
    settings: RoutingSettings,
}

impl RoutingEngine {
    pub fn new(
        matrix: DecisionMatrix,
        catalog: ProviderCatalog,
        classifier: TaskClassifier,
        modes: &ModeTable,
        settings: RoutingSettings,
    ) -> Self {
        let hints = modes
            .profiles()
            .iter()
            .filter_map(|p| p.task_hint.map(|t| (p.mode, t)))
            .collect();
        Self {
            matrix,
            catalog,
            classifier,
            hints,
            settings,
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn matrix(&self) -> &DecisionMatrix {
        &self.matrix
    }

    pub fn classify(&self, request: &Request, activations: &[ActivationScore]) -> Classification {
        let top = activations.first();
        let hint = top.and_then(|a| self.hints.get(&a.mode).copied());
        self.classifier.classify(request, top, hint)
    }

    /// 路由：activations 为冲突解析后的激活模式（优先级降序）
    pub fn route(
        &self,
        request: &Request,
        activations: &[ActivationScore],
        zone: ResourceZone,
        health: &ProviderHealth,
    ) -> RoutingDecision {
        let class = self.classify(request, activations);
        let modes: Vec<Mode> = activations.iter().map(|a| a.mode).collect();
        let row = self.matrix.lookup(class.task_type, class.domain);
        let mut decision = self.select(row, class.confidence, zone, health, &modes);
        decision.domain = class.domain;

        // 多领域且相关行都可并行时，按领域拆分为子路由
        if class.file_domains.len() >= self.settings.split_min_domains.max(2) {
            let rows: Vec<(&DomainTag, &Vec<String>, &MatrixRow)> = class
                .file_domains
                .iter()
                .map(|(d, files)| (d, files, self.matrix.lookup(class.task_type, *d)))
                .collect();
            if row.parallelizable && rows.iter().all(|(_, _, r)| r.parallelizable) {
                // 没有领域归属的文件交给顶层决策，不能从计划中丢失
                let assigned: Vec<&String> = class.file_domains.iter().flat_map(|(_, f)| f).collect();
                let residual: Vec<String> = request
                    .file_scope
                    .iter()
                    .filter(|f| !assigned.contains(f))
                    .cloned()
                    .collect();
                let top = decision.clone();
                decision.subtasks = rows
                    .into_iter()
                    .map(|(domain, files, r)| {
                        let mut sub = self.select(r, class.confidence, zone, health, &modes);
                        sub.domain = *domain;
                        SubRoute {
                            domain: *domain,
                            paths: files.clone(),
                            decision: sub,
                        }
                    })
                    .collect();
                if !residual.is_empty() {
                    decision.subtasks.push(SubRoute {
                        domain: DomainTag::Any,
                        paths: residual,
                        decision: top,
                    });
                }
            }
        }

        tracing::info!(
            request_id = %request.id,
            task = class.task_type.as_str(),
            domain = class.domain.as_str(),
            provider = %decision.selected_provider,
            zone = zone.as_str(),
            degraded = decision.degraded,
            "routing decision"
        );
        decision
    }

    /// 在一行矩阵中选择 provider
    pub fn select(
        &self,
        row: &MatrixRow,
        confidence: f64,
        zone: ResourceZone,
        health: &ProviderHealth,
        modes: &[Mode],
    ) -> RoutingDecision {
        let universal = self.catalog.universal();
        let filter = ResourceManager::provider_filter(zone);

        let mut candidates: Vec<&str> = row
            .candidates()
            .into_iter()
            .filter(|c| *c != universal)
            .collect();
        if filter == ProviderFilter::DeprioritizeOptimization {
            // 稳定分区：优化类挪到末尾
            let (keep, demoted): (Vec<&str>, Vec<&str>) = candidates
                .into_iter()
                .partition(|c| !self.catalog.get(c).map(|s| s.optimization).unwrap_or(false));
            candidates = keep.into_iter().chain(demoted).collect();
        }
        let had_candidates = !candidates.is_empty();

        let mut excluded = Vec::new();
        let mut eligible: Vec<&str> = Vec::new();
        for name in candidates {
            match self.ineligibility(name, filter, health) {
                Some(reason) => excluded.push(ExcludedProvider {
                    provider: name.to_string(),
                    reason,
                }),
                None => eligible.push(name),
            }
        }

        if confidence < row.min_confidence && eligible.first() == Some(&row.primary.as_str()) {
            excluded.push(ExcludedProvider {
                provider: row.primary.clone(),
                reason: format!(
                    "confidence {:.2} below row minimum {:.2}",
                    confidence, row.min_confidence
                ),
            });
            eligible.remove(0);
        }

        let (selected, mut chain, degraded) = match eligible.split_first() {
            Some((first, rest)) => (
                first.to_string(),
                rest.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                false,
            ),
            None => (universal.to_string(), Vec::new(), had_candidates),
        };
        if selected != universal {
            chain.push(universal.to_string());
        }

        RoutingDecision {
            selected_provider: selected,
            fallback_chain: chain,
            excluded,
            concurrency_hint: row.concurrency_hint.max(1),
            parallelizable: row.parallelizable,
            activated_modes: modes.to_vec(),
            confidence,
            task_type: row.task_type,
            domain: row.domain,
            timeout_ms: row.timeout_ms.unwrap_or(self.settings.default_timeout_ms),
            degraded,
            subtasks: Vec::new(),
        }
    }

    fn ineligibility(&self, name: &str, filter: ProviderFilter, health: &ProviderHealth) -> Option<String> {
        if !health.is_available(name) {
            return Some(format!(
                "unavailable: {}",
                health.reason(name).unwrap_or_else(|| "unknown".into())
            ));
        }
        match filter {
            ProviderFilter::UniversalOnly => Some("red zone: only the universal provider is eligible".into()),
            ProviderFilter::LightweightOnly
                if !self.catalog.get(name).map(|s| s.lightweight).unwrap_or(false) =>
            {
                Some("orange zone: provider is not lightweight".into())
            }
            _ => None,
        }
    }

    /// 由决策构建执行计划
    ///
    /// 校验步骤的 provider 同样受分区过滤与可用性约束，不合格时改用兜底 provider。
    pub fn build_plan(
        &self,
        request: &Request,
        decision: &RoutingDecision,
        modes: &ModeTable,
        zone: ResourceZone,
        health: &ProviderHealth,
    ) -> ExecutionPlan {
        let behaviors: Vec<_> = decision
            .activated_modes
            .iter()
            .filter_map(|m| modes.profile(*m).map(|p| p.behavior))
            .collect();
        let clarify = behaviors.iter().any(|b| b.clarify_first);
        let validate = behaviors.iter().any(|b| b.validate_after);

        let mut steps = Vec::new();
        if clarify {
            steps.push(
                Step::provider("clarify", decision.selected_provider.clone(), decision.timeout_ms)
                    .with_fallbacks(decision.fallback_chain.clone())
                    .with_instruction(format!("clarify requirements: {}", request.text))
                    .non_essential(),
            );
        }

        if decision.subtasks.is_empty() {
            steps.push(
                Step::provider("execute", decision.selected_provider.clone(), decision.timeout_ms)
                    .with_fallbacks(decision.fallback_chain.clone())
                    .with_instruction(request.text.clone())
                    .with_paths(request.file_scope.clone()),
            );
        } else {
            let children: Vec<ExecutionPlan> = decision
                .subtasks
                .iter()
                .map(|sub| {
                    let id = sub.domain.as_str();
                    ExecutionPlan::sequential(
                        format!("{}.{}", request.id, id),
                        vec![Step::provider(
                            format!("execute.{}", id),
                            sub.decision.selected_provider.clone(),
                            sub.decision.timeout_ms,
                        )
                        .with_fallbacks(sub.decision.fallback_chain.clone())
                        .with_instruction(request.text.clone())
                        .with_paths(sub.paths.clone())],
                    )
                    .with_concurrency_hint(sub.decision.concurrency_hint)
                })
                .collect();
            // 子计划最坏情况串行执行
            let budget: u64 = decision
                .subtasks
                .iter()
                .map(|s| s.decision.timeout_ms)
                .sum();
            steps.push(Step::delegate("execute", children, budget).with_instruction(request.text.clone()));
        }

        if validate {
            let universal = self.catalog.universal().to_string();
            let configured = &self.settings.validation_provider;
            let filter = ResourceManager::provider_filter(zone);
            let provider = if self.catalog.contains(configured)
                && (*configured == universal || self.ineligibility(configured, filter, health).is_none())
            {
                configured.clone()
            } else {
                universal.clone()
            };
            let fallbacks = if provider == universal { Vec::new() } else { vec![universal] };
            steps.push(
                Step::provider("validate", provider, self.settings.default_timeout_ms)
                    .with_fallbacks(fallbacks)
                    .with_instruction(format!("validate result of: {}", request.text))
                    .with_paths(request.file_scope.clone())
                    .depends_on(&["execute"]),
            );
        }

        let hint = if decision.subtasks.is_empty() {
            decision.concurrency_hint
        } else {
            decision.concurrency_hint.max(decision.subtasks.len())
        };
        ExecutionPlan::sequential(format!("plan.{}", request.id), steps)
            .with_mode(PlanMode::Sequential {
                break_on_error: self.settings.break_on_error,
            })
            .with_concurrency_hint(hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{BehaviorFlags, ModeProfile, Orientation};
    use crate::routing::{DomainSignals, ProviderSpec, StepKind, TaskKeywords};

    fn catalog() -> ProviderCatalog {
        ProviderCatalog::new(
            vec![
                ProviderSpec::new("deep-reasoning", ""),
                ProviderSpec::new("symbol-index", "").lightweight(),
                ProviderSpec::new("docs-lookup", "").lightweight(),
                ProviderSpec::new("bulk-edit", "").lightweight().optimization(),
                ProviderSpec::new("ui-builder", ""),
                ProviderSpec::new("a", ""),
                ProviderSpec::new("b", ""),
                ProviderSpec::new("c", ""),
                ProviderSpec::new("d", ""),
            ],
            "native",
        )
    }

    fn modes() -> ModeTable {
        ModeTable::new(
            vec![
                ModeProfile::new(Mode::Discovery, "behavior", Orientation::Neutral)
                    .with_task_hint(TaskType::Discovery)
                    .with_behavior(BehaviorFlags {
                        clarify_first: true,
                        ..Default::default()
                    }),
                ModeProfile::new(Mode::SafeValidation, "execution", Orientation::Safety).with_behavior(
                    BehaviorFlags {
                        validate_after: true,
                        ..Default::default()
                    },
                ),
            ],
            vec![],
            vec![],
        )
    }

    fn engine() -> RoutingEngine {
        let rows = vec![
            MatrixRow::new(TaskType::Analysis, DomainTag::Any, "deep-reasoning", &["symbol-index", "docs-lookup"])
                .parallel(2)
                .min_confidence(0.5),
            MatrixRow::new(TaskType::Refactor, DomainTag::Any, "deep-reasoning", &["bulk-edit", "symbol-index"]),
            MatrixRow::new(TaskType::Testing, DomainTag::Any, "a", &["b", "c", "d"]),
            MatrixRow::new(TaskType::Implementation, DomainTag::Frontend, "ui-builder", &["docs-lookup"]).parallel(2),
            MatrixRow::new(TaskType::Implementation, DomainTag::Backend, "symbol-index", &["docs-lookup"]).parallel(2),
            MatrixRow::new(TaskType::Implementation, DomainTag::Any, "symbol-index", &[]).parallel(2),
            MatrixRow::new(TaskType::General, DomainTag::Any, "native", &[]),
        ];
        let catalog = catalog();
        let matrix = DecisionMatrix::new(rows, &catalog).unwrap();
        let classifier = TaskClassifier::new(
            vec![
                TaskKeywords {
                    task_type: TaskType::Analysis,
                    keywords: vec!["analyz".into(), "investigat".into()],
                },
                TaskKeywords {
                    task_type: TaskType::Refactor,
                    keywords: vec!["refactor".into()],
                },
                TaskKeywords {
                    task_type: TaskType::Testing,
                    keywords: vec!["test".into()],
                },
                TaskKeywords {
                    task_type: TaskType::Implementation,
                    keywords: vec!["implement".into(), "build".into()],
                },
            ],
            vec![
                DomainSignals {
                    domain: DomainTag::Frontend,
                    extensions: vec!["tsx".into()],
                    keywords: vec![],
                },
                DomainSignals {
                    domain: DomainTag::Backend,
                    extensions: vec!["rs".into()],
                    keywords: vec![],
                },
            ],
            0.35,
        );
        RoutingEngine::new(
            matrix,
            catalog,
            classifier,
            &modes(),
            RoutingSettings {
                default_timeout_ms: 5_000,
                split_min_domains: 2,
                validation_provider: "deep-reasoning".into(),
                break_on_error: true,
            },
        )
    }

    fn health() -> ProviderHealth {
        ProviderHealth::new("native")
    }

    #[test]
    fn test_primary_selected_when_confident() {
        let e = engine();
        let req = Request::new("analyze and investigate the cache");
        let d = e.route(&req, &[], ResourceZone::Green, &health());
        assert_eq!(d.selected_provider, "deep-reasoning");
        assert_eq!(d.fallback_chain, vec!["symbol-index", "docs-lookup", "native"]);
        assert!(!d.degraded);
    }

    #[test]
    fn test_low_confidence_skips_primary() {
        let e = engine();
        // 单个关键词 → 0.35 < 0.5
        let req = Request::new("analyze the cache");
        let d = e.route(&req, &[], ResourceZone::Green, &health());
        assert_eq!(d.selected_provider, "symbol-index");
        assert!(d.excluded[0].reason.contains("confidence"));
    }

    #[test]
    fn test_orange_zone_only_lightweight() {
        let e = engine();
        let req = Request::new("analyze and investigate the cache");
        let d = e.route(&req, &[], ResourceZone::Orange, &health());
        assert_eq!(d.selected_provider, "symbol-index");
        for name in std::iter::once(&d.selected_provider).chain(d.fallback_chain.iter()) {
            assert!(e.catalog().get(name).unwrap().lightweight, "{name} is not lightweight");
        }
        assert!(d.excluded.iter().any(|x| x.provider == "deep-reasoning"));
    }

    #[test]
    fn test_yellow_zone_deprioritizes_optimization() {
        let e = engine();
        let h = health();
        h.mark_unavailable("deep-reasoning", "down");
        let d = e.route(&Request::new("refactor the parser"), &[], ResourceZone::Yellow, &h);
        assert_eq!(d.selected_provider, "symbol-index");
        assert_eq!(d.fallback_chain, vec!["bulk-edit", "native"]);
    }

    #[test]
    fn test_red_zone_only_universal() {
        let e = engine();
        let d = e.route(&Request::new("analyze and investigate the cache"), &[], ResourceZone::Red, &health());
        assert_eq!(d.selected_provider, "native");
        assert!(d.fallback_chain.is_empty());
        assert!(d.degraded);
    }

    #[test]
    fn test_third_fallback_then_universal() {
        let e = engine();
        let h = health();
        for p in ["a", "b", "c"] {
            h.mark_unavailable(p, "down");
        }
        let req = Request::new("test the login flow");
        let d = e.route(&req, &[], ResourceZone::Green, &h);
        assert_eq!(d.selected_provider, "d");
        assert!(!d.degraded);

        h.mark_unavailable("d", "down");
        let d = e.route(&req, &[], ResourceZone::Green, &h);
        assert_eq!(d.selected_provider, "native");
        assert!(d.degraded);
        assert_eq!(d.excluded.len(), 4);
    }

    #[test]
    fn test_every_row_terminates_at_universal() {
        let e = engine();
        for row in e.matrix().rows() {
            let h = health();
            let mut seen = Vec::new();
            loop {
                let d = e.select(row, 1.0, ResourceZone::Green, &h, &[]);
                assert!(!d.selected_provider.is_empty());
                if d.selected_provider == "native" {
                    break;
                }
                assert!(!seen.contains(&d.selected_provider), "selection did not advance");
                seen.push(d.selected_provider.clone());
                h.mark_unavailable(&d.selected_provider, "removed");
            }
        }
    }

    #[test]
    fn test_routing_is_deterministic() {
        let e = engine();
        let req = Request::new("implement the toolbar")
            .with_files(vec!["web/Toolbar.tsx".into(), "api/src/toolbar.rs".into()]);
        let first = e.route(&req, &[], ResourceZone::Green, &health());
        for _ in 0..5 {
            assert_eq!(e.route(&req, &[], ResourceZone::Green, &health()), first);
        }
    }

    #[test]
    fn test_multi_domain_split_builds_delegation() {
        let e = engine();
        let req = Request::new("implement the toolbar")
            .with_files(vec!["web/Toolbar.tsx".into(), "api/src/toolbar.rs".into()]);
        let d = e.route(&req, &[], ResourceZone::Green, &health());
        assert_eq!(d.subtasks.len(), 2);
        assert_eq!(d.subtasks[0].decision.selected_provider, "ui-builder");
        assert_eq!(d.subtasks[1].decision.selected_provider, "symbol-index");

        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Green, &health());
        assert_eq!(plan.steps.len(), 1);
        match &plan.steps[0].kind {
            StepKind::Delegate { children, .. } => assert_eq!(children.len(), 2),
            _ => panic!("expected delegation"),
        }
        assert_eq!(plan.total_steps(), 3);
    }

    #[test]
    fn test_plan_adds_clarify_and_validate_steps() {
        let e = engine();
        let req = Request::new("analyze and investigate the cache");
        let acts = vec![
            ActivationScore {
                mode: Mode::SafeValidation,
                score: 0.9,
                contributing_rules: vec![],
                declared: false,
                activated: true,
                declaration_order: 0,
            },
            ActivationScore {
                mode: Mode::Discovery,
                score: 0.7,
                contributing_rules: vec![],
                declared: false,
                activated: true,
                declaration_order: 1,
            },
        ];
        let d = e.route(&req, &acts, ResourceZone::Green, &health());
        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Green, &health());
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["clarify", "execute", "validate"]);
        assert!(!plan.steps[0].essential);
        assert_eq!(plan.steps[2].depends_on, vec!["execute"]);
    }

    fn safe_validation() -> Vec<ActivationScore> {
        vec![ActivationScore {
            mode: Mode::SafeValidation,
            score: 0.9,
            contributing_rules: vec![],
            declared: true,
            activated: true,
            declaration_order: 0,
        }]
    }

    fn validate_provider(plan: &ExecutionPlan) -> (String, Vec<String>) {
        match &plan.step("validate").unwrap().kind {
            StepKind::Provider { provider, fallbacks } => (provider.clone(), fallbacks.clone()),
            StepKind::Delegate { .. } => panic!("validate must be a provider step"),
        }
    }

    #[test]
    fn test_validate_step_respects_zone_filter() {
        let e = engine();
        let req = Request::new("analyze and investigate the cache");
        let acts = safe_validation();

        let d = e.route(&req, &acts, ResourceZone::Green, &health());
        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Green, &health());
        assert_eq!(validate_provider(&plan), ("deep-reasoning".to_string(), vec!["native".to_string()]));

        // Red：只允许兜底 provider
        let d = e.route(&req, &acts, ResourceZone::Red, &health());
        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Red, &health());
        assert_eq!(validate_provider(&plan), ("native".to_string(), vec![]));

        // Orange：deep-reasoning 不是轻量 provider
        let d = e.route(&req, &acts, ResourceZone::Orange, &health());
        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Orange, &health());
        assert_eq!(validate_provider(&plan).0, "native");
        let mut providers = Vec::new();
        plan.walk(&mut |_, step| providers.extend(step.primary_provider().map(str::to_string)));
        for name in providers {
            assert!(e.catalog().get(&name).unwrap().lightweight, "{name} is not lightweight");
        }
    }

    #[test]
    fn test_validate_step_skips_unavailable_provider() {
        let e = engine();
        let req = Request::new("analyze and investigate the cache");
        let h = health();
        h.mark_unavailable("deep-reasoning", "down");
        let d = e.route(&req, &safe_validation(), ResourceZone::Green, &h);
        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Green, &h);
        assert_eq!(validate_provider(&plan).0, "native");
    }

    #[test]
    fn test_split_keeps_files_without_domain() {
        let e = engine();
        let req = Request::new("implement the toolbar").with_files(vec![
            "web/Toolbar.tsx".into(),
            "api/src/toolbar.rs".into(),
            "schema/toolbar.graphql".into(),
        ]);
        let d = e.route(&req, &[], ResourceZone::Green, &health());
        assert_eq!(d.subtasks.len(), 3);
        let residual = &d.subtasks[2];
        assert_eq!(residual.domain, DomainTag::Any);
        assert_eq!(residual.paths, vec!["schema/toolbar.graphql".to_string()]);
        assert_eq!(residual.decision.selected_provider, d.selected_provider);

        let plan = e.build_plan(&req, &d, &modes(), ResourceZone::Green, &health());
        let mut paths = Vec::new();
        plan.walk(&mut |_, step| {
            if matches!(step.kind, StepKind::Provider { .. }) {
                paths.extend(step.target_paths.iter().cloned());
            }
        });
        paths.sort();
        let mut expected = req.file_scope.clone();
        expected.sort();
        assert_eq!(paths, expected);
    }
}
