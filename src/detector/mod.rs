//! 信号检测：触发规则表、模式表与打分 / 冲突解析

pub mod modes;
pub mod rules;
pub mod scoring;

pub use modes::{normalize_flag, BehaviorFlags, FlagBinding, Mode, ModeProfile, ModeTable, Orientation};
pub use rules::{compile_rules, Rule, RuleCategory, RuleInput, RequestFeatures, TriggerRule};
pub use scoring::{ActivationScore, SignalDetector};
