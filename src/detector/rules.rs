//! 触发规则：配置中的规则表 + 编译后的 `Rule` 能力
//!
//! 三类规则（lexical / semantic / context）都实现 [`Rule`]，检测器只依赖 `matches`，
//! 新增规则种类不需要改检测器的控制流。

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{ContextSnapshot, CoreError, Request};
use crate::detector::Mode;

/// 规则类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// 对请求文本做正则匹配
    Lexical,
    /// 对请求派生特征做比较（文件数、目录深度等）
    Semantic,
    /// 对上下文快照做比较（资源占用等）
    Context,
}

/// 配置中的一条触发规则（静态数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub category: RuleCategory,
    pub pattern: String,
    pub weight: f64,
    pub target_mode: Mode,
}

impl TriggerRule {
    pub fn lexical(id: &str, pattern: &str, weight: f64, target_mode: Mode) -> Self {
        Self {
            id: id.to_string(),
            category: RuleCategory::Lexical,
            pattern: pattern.to_string(),
            weight,
            target_mode,
        }
    }

    pub fn semantic(id: &str, pattern: &str, weight: f64, target_mode: Mode) -> Self {
        Self {
            category: RuleCategory::Semantic,
            ..Self::lexical(id, pattern, weight, target_mode)
        }
    }

    pub fn context(id: &str, pattern: &str, weight: f64, target_mode: Mode) -> Self {
        Self {
            category: RuleCategory::Context,
            ..Self::lexical(id, pattern, weight, target_mode)
        }
    }
}

/// 规则求值的输入：请求、快照与预先计算的特征
pub struct RuleInput<'a> {
    pub request: &'a Request,
    pub context: &'a ContextSnapshot,
    pub features: &'a RequestFeatures,
}

/// 请求的派生特征（每次检测只计算一次）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFeatures {
    pub file_count: f64,
    pub directory_depth: f64,
    pub top_level_dirs: f64,
    pub extension_count: f64,
    pub word_count: f64,
}

impl RequestFeatures {
    pub fn from_request(request: &Request) -> Self {
        let extension_count = request
            .extensions()
            .into_iter()
            .filter(|e| !e.is_empty())
            .collect::<BTreeSet<_>>()
            .len();
        Self {
            file_count: request.file_count() as f64,
            directory_depth: request.directory_depth() as f64,
            top_level_dirs: request.top_level_dirs() as f64,
            extension_count: extension_count as f64,
            word_count: request.word_count() as f64,
        }
    }
}

/// 规则能力：只回答「是否命中」
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn target_mode(&self) -> Mode;
    fn weight(&self) -> f64;
    fn matches(&self, input: &RuleInput<'_>) -> bool;
}

/// 词法规则：大小写不敏感的正则
pub struct LexicalRule {
    id: String,
    regex: Regex,
    weight: f64,
    target_mode: Mode,
}

impl Rule for LexicalRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn target_mode(&self) -> Mode {
        self.target_mode
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn matches(&self, input: &RuleInput<'_>) -> bool {
        self.regex.is_match(&input.request.text)
    }
}

/// 特征名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    FileCount,
    DirectoryDepth,
    TopLevelDirs,
    ExtensionCount,
    WordCount,
    ResourceUsage,
    ContextUsage,
    ElapsedMinutes,
    RecentOperations,
}

impl Feature {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "file_count" => Feature::FileCount,
            "directory_depth" => Feature::DirectoryDepth,
            "top_level_dirs" => Feature::TopLevelDirs,
            "extension_count" => Feature::ExtensionCount,
            "word_count" => Feature::WordCount,
            "resource_usage" => Feature::ResourceUsage,
            "context_usage" => Feature::ContextUsage,
            "elapsed_minutes" => Feature::ElapsedMinutes,
            "recent_operations" => Feature::RecentOperations,
            _ => return None,
        })
    }

    fn is_context(&self) -> bool {
        matches!(
            self,
            Feature::ResourceUsage
                | Feature::ContextUsage
                | Feature::ElapsedMinutes
                | Feature::RecentOperations
        )
    }

    fn value(&self, input: &RuleInput<'_>) -> f64 {
        let f = input.features;
        let c = input.context;
        match self {
            Feature::FileCount => f.file_count,
            Feature::DirectoryDepth => f.directory_depth,
            Feature::TopLevelDirs => f.top_level_dirs,
            Feature::ExtensionCount => f.extension_count,
            Feature::WordCount => f.word_count,
            Feature::ResourceUsage => c.resource_usage_percent,
            Feature::ContextUsage => c.context_usage_percent,
            Feature::ElapsedMinutes => c.elapsed_session_minutes,
            Feature::RecentOperations => c.recent_operations.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            "==" => Comparator::Eq,
            _ => return None,
        })
    }

    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Gt => lhs > rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
            Comparator::Eq => (lhs - rhs).abs() < f64::EPSILON,
        }
    }
}

/// 语义 / 上下文规则：`<feature> <op> <number>`
pub struct ThresholdRule {
    id: String,
    feature: Feature,
    comparator: Comparator,
    threshold: f64,
    weight: f64,
    target_mode: Mode,
}

impl Rule for ThresholdRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn target_mode(&self) -> Mode {
        self.target_mode
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn matches(&self, input: &RuleInput<'_>) -> bool {
        self.comparator
            .apply(self.feature.value(input), self.threshold)
    }
}

fn invalid(rule: &TriggerRule, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidRule {
        id: rule.id.clone(),
        reason: reason.into(),
    }
}

fn parse_threshold(rule: &TriggerRule) -> Result<(Feature, Comparator, f64), CoreError> {
    let parts: Vec<&str> = rule.pattern.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(invalid(rule, "expected `<feature> <op> <number>`"));
    }
    let feature =
        Feature::parse(parts[0]).ok_or_else(|| invalid(rule, format!("unknown feature {}", parts[0])))?;
    let comparator = Comparator::parse(parts[1])
        .ok_or_else(|| invalid(rule, format!("unknown comparator {}", parts[1])))?;
    let threshold: f64 = parts[2]
        .parse()
        .map_err(|_| invalid(rule, format!("not a number: {}", parts[2])))?;
    Ok((feature, comparator, threshold))
}

/// 将规则表编译为 `Rule` 对象（保持声明顺序）
pub fn compile_rules(table: &[TriggerRule]) -> Result<Vec<Box<dyn Rule>>, CoreError> {
    let mut compiled: Vec<Box<dyn Rule>> = Vec::with_capacity(table.len());
    for rule in table {
        if !(rule.weight.is_finite() && rule.weight >= 0.0) {
            return Err(invalid(rule, "weight must be a non-negative number"));
        }
        match rule.category {
            RuleCategory::Lexical => {
                let regex = Regex::new(&format!("(?i){}", rule.pattern))
                    .map_err(|e| invalid(rule, e.to_string()))?;
                compiled.push(Box::new(LexicalRule {
                    id: rule.id.clone(),
                    regex,
                    weight: rule.weight,
                    target_mode: rule.target_mode,
                }));
            }
            RuleCategory::Semantic | RuleCategory::Context => {
                let (feature, comparator, threshold) = parse_threshold(rule)?;
                let wants_context = rule.category == RuleCategory::Context;
                if feature.is_context() != wants_context {
                    return Err(invalid(
                        rule,
                        "context rules take snapshot features, semantic rules take request features",
                    ));
                }
                compiled.push(Box::new(ThresholdRule {
                    id: rule.id.clone(),
                    feature,
                    comparator,
                    threshold,
                    weight: rule.weight,
                    target_mode: rule.target_mode,
                }));
            }
        }
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(rule: &TriggerRule, request: &Request, context: &ContextSnapshot) -> bool {
        let compiled = compile_rules(std::slice::from_ref(rule)).unwrap();
        let features = RequestFeatures::from_request(request);
        compiled[0].matches(&RuleInput {
            request,
            context,
            features: &features,
        })
    }

    #[test]
    fn test_lexical_is_case_insensitive() {
        let rule = TriggerRule::lexical("d1", r"\bbrainstorm", 0.2, Mode::Discovery);
        let req = Request::new("Let's BRAINSTORM a plugin system");
        assert!(eval(&rule, &req, &ContextSnapshot::default()));
        assert!(!eval(&rule, &Request::new("fix the bug"), &ContextSnapshot::default()));
    }

    #[test]
    fn test_semantic_file_count() {
        let rule = TriggerRule::semantic("s1", "file_count > 2", 0.3, Mode::TaskCoordination);
        let req = Request::new("x").with_files(vec!["a.rs".into(), "b.rs".into(), "c.rs".into()]);
        assert!(eval(&rule, &req, &ContextSnapshot::default()));
        let req = Request::new("x").with_files(vec!["a.rs".into()]);
        assert!(!eval(&rule, &req, &ContextSnapshot::default()));
    }

    #[test]
    fn test_context_resource_usage() {
        let rule = TriggerRule::context("c1", "resource_usage >= 75", 0.5, Mode::CompressedCommunication);
        let ctx = ContextSnapshot {
            resource_usage_percent: 75.0,
            ..Default::default()
        };
        assert!(eval(&rule, &Request::new("x"), &ctx));
    }

    #[test]
    fn test_compile_rejects_bad_patterns() {
        let bad_regex = TriggerRule::lexical("l", "(unclosed", 0.1, Mode::Discovery);
        assert!(compile_rules(&[bad_regex]).is_err());

        let bad_feature = TriggerRule::semantic("s", "planets > 3", 0.1, Mode::Discovery);
        assert!(compile_rules(&[bad_feature]).is_err());

        let wrong_category = TriggerRule::semantic("s", "resource_usage > 3", 0.1, Mode::Discovery);
        assert!(compile_rules(&[wrong_category]).is_err());

        let negative = TriggerRule::lexical("n", "x", -1.0, Mode::Discovery);
        assert!(compile_rules(&[negative]).is_err());
    }
}
