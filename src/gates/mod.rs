//! 质量门禁：执行前 / 执行中 / 执行后三个阶段
//!
//! 严重度从高到低：critical > error > warning > suggestion。
//! 一个阶段的聚合结果为所有未通过结果中的最高严重度；没有未通过结果即为通过。

pub mod monitor;
pub mod pipeline;
pub mod rules;

use serde::Serialize;

pub use monitor::{InFlightMonitor, MonitorReport};
pub use pipeline::{GateInput, GatePipeline};
pub use rules::{GateConfig, GateRule};

/// 严重度（可比较：Suggestion < Warning < Error < Critical）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Suggestion,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Suggestion => "suggestion",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// 门禁阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStage {
    Pre,
    During,
    Post,
}

impl GateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStage::Pre => "pre",
            GateStage::During => "during",
            GateStage::Post => "post",
        }
    }
}

/// 单条门禁结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub stage: GateStage,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
    pub rule_id: String,
}

impl GateResult {
    pub fn pass(stage: GateStage, rule_id: &str) -> Self {
        Self {
            stage,
            severity: Severity::Suggestion,
            passed: true,
            message: String::new(),
            rule_id: rule_id.to_string(),
        }
    }

    pub fn fail(stage: GateStage, severity: Severity, rule_id: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity,
            passed: false,
            message: message.into(),
            rule_id: rule_id.to_string(),
        }
    }
}

/// 阶段聚合结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "severity")]
pub enum GateOutcome {
    Pass,
    Fail(Severity),
}

impl GateOutcome {
    /// 至少为给定严重度的失败
    pub fn at_least(&self, severity: Severity) -> bool {
        matches!(self, GateOutcome::Fail(s) if *s >= severity)
    }
}

/// 聚合：未通过结果中的最高严重度；空集合或全部通过为 Pass
pub fn aggregate(results: &[GateResult]) -> GateOutcome {
    results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.severity)
        .max()
        .map(GateOutcome::Fail)
        .unwrap_or(GateOutcome::Pass)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aggregates_to_pass() {
        assert_eq!(aggregate(&[]), GateOutcome::Pass);
        assert_eq!(
            aggregate(&[GateResult::pass(GateStage::Pre, "a")]),
            GateOutcome::Pass
        );
    }

    #[test]
    fn test_aggregate_is_max_severity() {
        let results = vec![
            GateResult::fail(GateStage::Post, Severity::Warning, "w", "w"),
            GateResult::fail(GateStage::Post, Severity::Critical, "c", "c"),
            GateResult::fail(GateStage::Post, Severity::Suggestion, "s", "s"),
            GateResult::pass(GateStage::Post, "p"),
        ];
        assert_eq!(aggregate(&results), GateOutcome::Fail(Severity::Critical));

        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed), aggregate(&results));
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Suggestion);
        assert!(GateOutcome::Fail(Severity::Error).at_least(Severity::Error));
        assert!(!GateOutcome::Fail(Severity::Warning).at_least(Severity::Error));
        assert!(!GateOutcome::Pass.at_least(Severity::Suggestion));
    }
}
