//! 信号检测器：按规则表对请求打分，产出按分数降序的 ActivationScore
//!
//! score(mode) = Σ 命中规则权重 / divisor(mode)，截断到 [0, 1]；
//! score ≥ threshold(mode) 即激活。显式声明的 flag 直接以 1.0 激活。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::core::{ContextSnapshot, CoreError, Request};
use crate::detector::rules::{Rule, RuleInput, RequestFeatures};
use crate::detector::{Mode, ModeTable};

/// 阈值比较的浮点容差（0.2 * 3 应当等于 0.6）
const SCORE_EPSILON: f64 = 1e-9;

/// 某个模式的激活分数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationScore {
    pub mode: Mode,
    pub score: f64,
    pub contributing_rules: Vec<String>,
    /// 来自用户显式 flag
    pub declared: bool,
    /// 达到阈值（或显式声明）
    pub activated: bool,
    /// 首条命中规则在规则表中的位置；显式声明时为模式表位置
    #[serde(skip)]
    pub declaration_order: usize,
}

/// 信号检测器（规则已编译，整表不可变）
pub struct SignalDetector {
    rules: Vec<Box<dyn Rule>>,
    modes: ModeTable,
    min_text_chars: usize,
}

impl SignalDetector {
    pub fn new(rules: Vec<Box<dyn Rule>>, modes: ModeTable, min_text_chars: usize) -> Self {
        Self {
            rules,
            modes,
            min_text_chars,
        }
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 对请求打分；互斥 flag 同时声明时返回 `ConflictingFlags`，由调用方决定如何上报
    pub fn detect(
        &self,
        request: &Request,
        context: &ContextSnapshot,
    ) -> Result<Vec<ActivationScore>, CoreError> {
        if let Some((a, b)) = self.modes.find_conflict(&request.declared_flags) {
            return Err(CoreError::ConflictingFlags(a, b));
        }

        // 过短的请求只保留基线行为，不做自动检测
        let too_short = request.text.trim().chars().count() < self.min_text_chars;

        let mut acc: BTreeMap<Mode, (f64, Vec<String>, usize)> = BTreeMap::new();
        if !too_short {
            let features = RequestFeatures::from_request(request);
            let input = RuleInput {
                request,
                context,
                features: &features,
            };
            for (index, rule) in self.rules.iter().enumerate() {
                if rule.matches(&input) {
                    let entry = acc
                        .entry(rule.target_mode())
                        .or_insert((0.0, Vec::new(), index));
                    entry.0 += rule.weight();
                    entry.1.push(rule.id().to_string());
                }
            }
        }

        let declared: Vec<(Mode, String)> = request
            .declared_flags
            .iter()
            .filter_map(|f| self.modes.mode_for_flag(f).map(|m| (m, f.clone())))
            .collect();

        let mut scores = Vec::new();
        for profile in self.modes.profiles() {
            let flags: Vec<&String> = declared
                .iter()
                .filter(|(m, _)| *m == profile.mode)
                .map(|(_, f)| f)
                .collect();
            let (raw, rules, first) = acc
                .remove(&profile.mode)
                .unwrap_or((0.0, Vec::new(), usize::MAX));

            if !flags.is_empty() {
                let mut contributing: Vec<String> =
                    flags.iter().map(|f| format!("flag:{}", f)).collect();
                contributing.extend(rules);
                scores.push(ActivationScore {
                    mode: profile.mode,
                    score: 1.0,
                    contributing_rules: contributing,
                    declared: true,
                    activated: true,
                    declaration_order: self.modes.position(profile.mode),
                });
                continue;
            }

            if rules.is_empty() {
                continue;
            }
            let divisor = if profile.divisor > 0.0 { profile.divisor } else { 1.0 };
            let score = (raw / divisor).clamp(0.0, 1.0);
            scores.push(ActivationScore {
                mode: profile.mode,
                score,
                contributing_rules: rules,
                declared: false,
                activated: score > 0.0 && score + SCORE_EPSILON >= profile.threshold,
                declaration_order: first,
            });
        }

        scores.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.declared.cmp(&a.declared))
                .then_with(|| self.orientation_rank(a.mode).cmp(&self.orientation_rank(b.mode)))
                .then_with(|| a.declaration_order.cmp(&b.declaration_order))
        });

        tracing::debug!(
            request_id = %request.id,
            activations = scores.iter().filter(|s| s.activated).count(),
            "signal detection"
        );
        Ok(scores)
    }

    /// 冲突解析：返回最终激活的模式（优先级降序）
    ///
    /// 1. 显式 flag 压制同类别的自动检测模式；
    /// 2. 安全取向排在优化取向之前；
    /// 3. 其余按分数降序，再按规则表声明顺序。
    pub fn resolve(&self, scores: &[ActivationScore]) -> Vec<ActivationScore> {
        let declared_categories: HashSet<&str> = scores
            .iter()
            .filter(|s| s.declared)
            .filter_map(|s| self.modes.profile(s.mode).map(|p| p.category.as_str()))
            .collect();

        let mut active: Vec<ActivationScore> = scores
            .iter()
            .filter(|s| s.activated)
            .filter(|s| {
                s.declared
                    || self
                        .modes
                        .profile(s.mode)
                        .map(|p| !declared_categories.contains(p.category.as_str()))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();

        active.sort_by(|a, b| self.priority(a, b));
        active
    }

    fn priority(&self, a: &ActivationScore, b: &ActivationScore) -> Ordering {
        b.declared
            .cmp(&a.declared)
            .then_with(|| self.orientation_rank(a.mode).cmp(&self.orientation_rank(b.mode)))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.declaration_order.cmp(&b.declaration_order))
    }

    fn orientation_rank(&self, mode: Mode) -> u8 {
        self.modes
            .profile(mode)
            .map(|p| p.orientation.rank())
            .unwrap_or(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::rules::{compile_rules, TriggerRule};
    use crate::detector::{FlagBinding, ModeProfile, Orientation};

    fn detector() -> SignalDetector {
        let rules = vec![
            TriggerRule::lexical("disc.brainstorm", r"\bbrainstorm", 0.2, Mode::Discovery),
            TriggerRule::lexical("disc.maybe", r"\bmaybe\b", 0.2, Mode::Discovery),
            TriggerRule::lexical("disc.explore", r"\bexplore\b", 0.2, Mode::Discovery),
            TriggerRule::lexical("disc.ideas", r"\bideas?\b", 0.2, Mode::Discovery),
            TriggerRule::lexical("safe.prod", r"\bproduction\b", 0.6, Mode::SafeValidation),
            TriggerRule::lexical("uc.brief", r"\bbrief\b", 0.7, Mode::CompressedCommunication),
            TriggerRule::lexical("intro.why", r"\bwhy did\b", 0.6, Mode::SelfAnalysis),
        ];
        let modes = ModeTable::new(
            vec![
                ModeProfile::new(Mode::Discovery, "behavior", Orientation::Neutral),
                ModeProfile::new(Mode::SelfAnalysis, "behavior", Orientation::Neutral),
                ModeProfile::new(Mode::SafeValidation, "execution", Orientation::Safety),
                ModeProfile::new(Mode::CompressedCommunication, "output", Orientation::Optimization),
            ],
            vec![
                FlagBinding {
                    flag: "--introspect".into(),
                    mode: Mode::SelfAnalysis,
                },
                FlagBinding {
                    flag: "--uc".into(),
                    mode: Mode::CompressedCommunication,
                },
            ],
            vec![vec!["--uc".into(), "--verbose".into()]],
        );
        SignalDetector::new(compile_rules(&rules).unwrap(), modes, 8)
    }

    #[test]
    fn test_three_discovery_triggers_activate() {
        let d = detector();
        let req = Request::new("maybe we could brainstorm and explore a plugin system");
        let scores = d.detect(&req, &ContextSnapshot::default()).unwrap();
        assert_eq!(scores[0].mode, Mode::Discovery);
        assert!(scores[0].score >= 0.6 - SCORE_EPSILON);
        assert!(scores[0].activated);
        assert_eq!(scores[0].contributing_rules.len(), 3);
    }

    #[test]
    fn test_two_triggers_stay_below_threshold() {
        let d = detector();
        let req = Request::new("maybe brainstorm something");
        let scores = d.detect(&req, &ContextSnapshot::default()).unwrap();
        assert!(!scores[0].activated);
        assert!(d.resolve(&scores).is_empty());
    }

    #[test]
    fn test_short_request_has_no_activations() {
        let d = detector();
        let scores = d.detect(&Request::new("ideas?"), &ContextSnapshot::default()).unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_conflicting_flags_is_error() {
        let d = detector();
        let req = Request::new("summarize the module layout")
            .with_flags(vec!["--uc".into(), "--verbose".into()]);
        let err = d.detect(&req, &ContextSnapshot::default()).unwrap_err();
        assert!(matches!(err, CoreError::ConflictingFlags(_, _)));
    }

    #[test]
    fn test_declared_flag_suppresses_same_category() {
        let d = detector();
        let req = Request::new("maybe brainstorm ideas and explore options")
            .with_flags(vec!["--introspect".into()]);
        let scores = d.detect(&req, &ContextSnapshot::default()).unwrap();
        let active = d.resolve(&scores);
        assert_eq!(active[0].mode, Mode::SelfAnalysis);
        assert!(active.iter().all(|s| s.mode != Mode::Discovery));
    }

    #[test]
    fn test_safety_outranks_optimization() {
        let d = detector();
        // brief 的分数 (0.7) 高于 production (0.6)，但安全取向优先
        let req = Request::new("give a brief plan for the production rollout");
        let scores = d.detect(&req, &ContextSnapshot::default()).unwrap();
        assert_eq!(scores[0].mode, Mode::CompressedCommunication);
        let active = d.resolve(&scores);
        assert_eq!(active[0].mode, Mode::SafeValidation);
        assert_eq!(active[1].mode, Mode::CompressedCommunication);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let d = detector();
        let req = Request::new("why did the production deploy fail, give a brief answer");
        let ctx = ContextSnapshot::default();
        let first = d.detect(&req, &ctx).unwrap();
        for _ in 0..10 {
            assert_eq!(d.detect(&req, &ctx).unwrap(), first);
        }
    }
}
