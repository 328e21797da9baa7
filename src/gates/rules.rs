//! 内置门禁规则
//!
//! 规则之间相互独立：每条规则只读 GateInput，不依赖同阶段其他规则的结果或执行顺序。

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::core::CoreError;
use crate::execution::{StepGraph, StepStatus};
use crate::gates::{GateInput, GateResult, GateStage, Severity};
use crate::resource::ResourceZone;
use crate::routing::{ExecutionPlan, StepKind};

/// 门禁规则
pub trait GateRule: Send + Sync {
    fn id(&self) -> &str;

    fn stage(&self) -> GateStage;

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult;
}

/// 门禁配置（[gates]）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_scope_warn_files")]
    pub scope_warn_files: usize,
    #[serde(default = "default_scope_error_files")]
    pub scope_error_files: usize,
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    #[serde(default = "default_destructive_operations")]
    pub destructive_operations: Vec<String>,
    /// 运行时间超过 timeout × ratio 的步骤视为慢步骤
    #[serde(default = "default_slow_step_ratio")]
    pub slow_step_ratio: f64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_scope_warn_files() -> usize {
    50
}

fn default_scope_error_files() -> usize {
    500
}

fn default_protected_paths() -> Vec<String> {
    [".git/**", "**/.env", "**/*.pem", "**/*.key", "**/secrets/**"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_destructive_operations() -> Vec<String> {
    ["delete", "bulk_delete", "rm", "drop", "truncate", "force_push", "overwrite"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_slow_step_ratio() -> f64 {
    0.8
}

fn default_monitor_interval_ms() -> u64 {
    250
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            scope_warn_files: default_scope_warn_files(),
            scope_error_files: default_scope_error_files(),
            protected_paths: default_protected_paths(),
            destructive_operations: default_destructive_operations(),
            slow_step_ratio: default_slow_step_ratio(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------- pre

/// 作用范围：文件数过多
pub struct ScopeRule {
    pub warn_files: usize,
    pub error_files: usize,
}

impl GateRule for ScopeRule {
    fn id(&self) -> &str {
        "pre.scope"
    }

    fn stage(&self) -> GateStage {
        GateStage::Pre
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let n = input.request.file_count();
        if n > self.error_files {
            GateResult::fail(
                self.stage(),
                Severity::Error,
                self.id(),
                format!("{} files in scope exceeds the limit of {}", n, self.error_files),
            )
        } else if n > self.warn_files {
            GateResult::fail(
                self.stage(),
                Severity::Warning,
                self.id(),
                format!("{} files in scope; consider splitting the operation", n),
            )
        } else {
            GateResult::pass(self.stage(), self.id())
        }
    }
}

/// 资源：Red 区会跳过非关键步骤
pub struct ResourceRule;

impl GateRule for ResourceRule {
    fn id(&self) -> &str {
        "pre.resource"
    }

    fn stage(&self) -> GateStage {
        GateStage::Pre
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        if input.zone != ResourceZone::Red {
            return GateResult::pass(self.stage(), self.id());
        }
        let mut skipped = Vec::new();
        if let Some(plan) = input.plan {
            plan.walk(&mut |_, s| {
                if !s.essential {
                    skipped.push(s.id.clone());
                }
            });
        }
        if skipped.is_empty() {
            GateResult::fail(
                self.stage(),
                Severity::Warning,
                self.id(),
                "resource zone red: only the universal provider is eligible",
            )
        } else {
            GateResult::fail(
                self.stage(),
                Severity::Warning,
                self.id(),
                format!(
                    "resource zone red: non-essential steps will be skipped: {}",
                    skipped.join(", ")
                ),
            )
        }
    }
}

/// 依赖完整性：未知依赖或依赖环会使计划无法执行
pub struct DependencyRule;

impl DependencyRule {
    fn problems(plan: &ExecutionPlan, out: &mut Vec<String>) {
        let graph = StepGraph::new(&plan.steps);
        for step in &plan.steps {
            if let Some(missing) = graph.dangling(&step.id) {
                out.push(format!("{} depends on unknown {}", step.id, missing.join(", ")));
            }
            if let StepKind::Delegate { children, .. } = &step.kind {
                for child in children {
                    Self::problems(child, out);
                }
            }
        }
        let cycle = graph.cycle_members();
        if !cycle.is_empty() {
            out.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
    }
}

impl GateRule for DependencyRule {
    fn id(&self) -> &str {
        "pre.dependencies"
    }

    fn stage(&self) -> GateStage {
        GateStage::Pre
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let Some(plan) = input.plan else {
            return GateResult::pass(self.stage(), self.id());
        };
        let mut problems = Vec::new();
        Self::problems(plan, &mut problems);
        if problems.is_empty() {
            GateResult::pass(self.stage(), self.id())
        } else {
            GateResult::fail(self.stage(), Severity::Critical, self.id(), problems.join("; "))
        }
    }
}

/// 受保护路径：破坏性操作触及受保护路径时阻断
pub struct ProtectedPathRule {
    patterns: Vec<Pattern>,
    destructive: Vec<String>,
}

impl ProtectedPathRule {
    pub fn new(patterns: &[String], destructive: &[String]) -> Result<Self, CoreError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| CoreError::Config(format!("protected path `{}`: {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            destructive: destructive.iter().map(|s| s.to_lowercase()).collect(),
        })
    }

    fn protected<'a>(&self, paths: &'a [String]) -> Vec<&'a str> {
        let opts = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        paths
            .iter()
            .map(|p| p.as_str())
            .filter(|p| {
                let normalized = p.trim_start_matches("./");
                self.patterns.iter().any(|pat| pat.matches_with(normalized, opts))
            })
            .collect()
    }
}

impl GateRule for ProtectedPathRule {
    fn id(&self) -> &str {
        "pre.protected_paths"
    }

    fn stage(&self) -> GateStage {
        GateStage::Pre
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let hits = self.protected(&input.request.file_scope);
        if hits.is_empty() {
            return GateResult::pass(self.stage(), self.id());
        }
        let op = input.request.operation_type.to_lowercase();
        if self.destructive.contains(&op) {
            GateResult::fail(
                self.stage(),
                Severity::Critical,
                self.id(),
                format!("destructive operation `{}` on protected paths: {}", op, hits.join(", ")),
            )
        } else {
            GateResult::fail(
                self.stage(),
                Severity::Warning,
                self.id(),
                format!("operation touches protected paths: {}", hits.join(", ")),
            )
        }
    }
}

/// 路由降级：配置的候选全部不可用
pub struct RoutingRule;

impl GateRule for RoutingRule {
    fn id(&self) -> &str {
        "pre.routing"
    }

    fn stage(&self) -> GateStage {
        GateStage::Pre
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        match input.decision {
            Some(d) if d.any_degraded() => {
                let excluded: Vec<String> = d
                    .excluded
                    .iter()
                    .map(|e| format!("{} ({})", e.provider, e.reason))
                    .collect();
                GateResult::fail(
                    self.stage(),
                    Severity::Warning,
                    self.id(),
                    format!(
                        "routing degraded to {}; excluded: {}",
                        d.selected_provider,
                        excluded.join(", ")
                    ),
                )
            }
            _ => GateResult::pass(self.stage(), self.id()),
        }
    }
}

// ---------------------------------------------------------------- post

/// 完整性：被跳过的步骤
pub struct CompletenessRule;

impl GateRule for CompletenessRule {
    fn id(&self) -> &str {
        "post.completeness"
    }

    fn stage(&self) -> GateStage {
        GateStage::Post
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let Some(result) = input.result else {
            return GateResult::pass(self.stage(), self.id());
        };
        let skipped = result.skipped();
        if skipped.is_empty() {
            return GateResult::pass(self.stage(), self.id());
        }
        let severity = if skipped.iter().any(|o| o.essential) {
            Severity::Error
        } else {
            Severity::Warning
        };
        let lines: Vec<String> = skipped.iter().map(|o| o.describe()).collect();
        GateResult::fail(
            self.stage(),
            severity,
            self.id(),
            format!("skipped steps: {}", lines.join("; ")),
        )
    }
}

/// 回退：失败 / 超时的步骤，以及经回退完成的步骤
pub struct FallbackRule;

impl GateRule for FallbackRule {
    fn id(&self) -> &str {
        "post.fallback"
    }

    fn stage(&self) -> GateStage {
        GateStage::Post
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let Some(result) = input.result else {
            return GateResult::pass(self.stage(), self.id());
        };
        let all = result.flatten();
        // 委派步骤的失败由其子步骤说明
        let failed: Vec<String> = all
            .iter()
            .filter(|o| o.status.is_failure() && o.children.is_empty())
            .map(|o| o.describe())
            .collect();
        if !failed.is_empty() {
            return GateResult::fail(
                self.stage(),
                Severity::Error,
                self.id(),
                format!("steps failed after exhausting fallbacks: {}", failed.join("; ")),
            );
        }
        let rescued: Vec<String> = all
            .iter()
            .filter(|o| o.status == StepStatus::Completed && o.fallback_used)
            .map(|o| o.describe())
            .collect();
        if rescued.is_empty() {
            GateResult::pass(self.stage(), self.id())
        } else {
            GateResult::fail(
                self.stage(),
                Severity::Warning,
                self.id(),
                format!("completed via fallback: {}", rescued.join("; ")),
            )
        }
    }
}

/// 截止时间：调用预算耗尽
pub struct DeadlineRule;

impl GateRule for DeadlineRule {
    fn id(&self) -> &str {
        "post.deadline"
    }

    fn stage(&self) -> GateStage {
        GateStage::Post
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        match input.result {
            Some(r) if r.any_deadline_exceeded() => GateResult::fail(
                self.stage(),
                Severity::Error,
                self.id(),
                "invocation deadline exceeded; remaining work was not attempted",
            ),
            _ => GateResult::pass(self.stage(), self.id()),
        }
    }
}

/// 空输出
pub struct OutputRule;

impl GateRule for OutputRule {
    fn id(&self) -> &str {
        "post.output"
    }

    fn stage(&self) -> GateStage {
        GateStage::Post
    }

    fn evaluate(&self, input: &GateInput<'_>) -> GateResult {
        let Some(result) = input.result else {
            return GateResult::pass(self.stage(), self.id());
        };
        let empty: Vec<&str> = result
            .flatten()
            .into_iter()
            .filter(|o| o.status == StepStatus::Completed && o.children.is_empty())
            .filter(|o| o.output.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true))
            .map(|o| o.step_id.as_str())
            .collect();
        if empty.is_empty() {
            GateResult::pass(self.stage(), self.id())
        } else {
            GateResult::fail(
                self.stage(),
                Severity::Suggestion,
                self.id(),
                format!("steps completed without output: {}", empty.join(", ")),
            )
        }
    }
}
