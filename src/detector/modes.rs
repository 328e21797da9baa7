//! 行为模式：固定枚举集合 + 每个模式的类别、取向与行为修饰
//!
//! 模式表本身是数据（来自配置），这里只定义类型与查表逻辑。

use serde::{Deserialize, Serialize};

use crate::routing::TaskType;

/// 行为模式（固定集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// 需求发现 / 头脑风暴
    Discovery,
    /// 多步骤任务协调
    TaskCoordination,
    /// 工具编排优化（并行、批量）
    ToolOptimization,
    /// 压缩输出
    CompressedCommunication,
    /// 自我分析 / 复盘
    SelfAnalysis,
    /// 保守执行：先验证再动手
    SafeValidation,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Discovery => "discovery",
            Mode::TaskCoordination => "task_coordination",
            Mode::ToolOptimization => "tool_optimization",
            Mode::CompressedCommunication => "compressed_communication",
            Mode::SelfAnalysis => "self_analysis",
            Mode::SafeValidation => "safe_validation",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模式取向：安全类优先于优化类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Safety,
    Neutral,
    Optimization,
}

impl Orientation {
    /// 冲突解析时的排序键（越小越优先）
    pub fn rank(&self) -> u8 {
        match self {
            Orientation::Safety => 0,
            Orientation::Neutral => 1,
            Orientation::Optimization => 2,
        }
    }
}

/// 模式激活后对执行行为的修饰
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorFlags {
    /// 输出压缩
    #[serde(default)]
    pub compress_output: bool,
    /// 执行后追加验证步骤
    #[serde(default)]
    pub validate_after: bool,
    /// 允许拆分子任务并行
    #[serde(default)]
    pub prefer_parallel: bool,
    /// 先澄清需求
    #[serde(default)]
    pub clarify_first: bool,
}

/// 模式表中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeProfile {
    pub mode: Mode,
    /// 冲突类别：同类别中显式声明的 flag 直接胜出
    pub category: String,
    pub orientation: Orientation,
    /// 激活阈值（归一化分数）
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// 归一化除数：score = Σweight / divisor
    #[serde(default = "default_divisor")]
    pub divisor: f64,
    /// 路由提示：该模式为首位激活时倾向的任务类型
    #[serde(default)]
    pub task_hint: Option<TaskType>,
    #[serde(default)]
    pub behavior: BehaviorFlags,
}

fn default_threshold() -> f64 {
    0.6
}

fn default_divisor() -> f64 {
    1.0
}

impl ModeProfile {
    pub fn new(mode: Mode, category: &str, orientation: Orientation) -> Self {
        Self {
            mode,
            category: category.to_string(),
            orientation,
            threshold: default_threshold(),
            divisor: default_divisor(),
            task_hint: None,
            behavior: BehaviorFlags::default(),
        }
    }

    pub fn with_task_hint(mut self, task: TaskType) -> Self {
        self.task_hint = Some(task);
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorFlags) -> Self {
        self.behavior = behavior;
        self
    }
}

/// 显式 flag → 模式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagBinding {
    pub flag: String,
    pub mode: Mode,
}

/// 编译后的模式表（按声明顺序）
#[derive(Debug, Clone, Default)]
pub struct ModeTable {
    profiles: Vec<ModeProfile>,
    flags: Vec<FlagBinding>,
    exclusive_groups: Vec<Vec<String>>,
}

impl ModeTable {
    pub fn new(
        profiles: Vec<ModeProfile>,
        flags: Vec<FlagBinding>,
        exclusive_groups: Vec<Vec<String>>,
    ) -> Self {
        Self {
            profiles,
            flags,
            exclusive_groups,
        }
    }

    pub fn profile(&self, mode: Mode) -> Option<&ModeProfile> {
        self.profiles.iter().find(|p| p.mode == mode)
    }

    pub fn profiles(&self) -> &[ModeProfile] {
        &self.profiles
    }

    /// 模式在表中的声明位置（用于稳定排序）
    pub fn position(&self, mode: Mode) -> usize {
        self.profiles
            .iter()
            .position(|p| p.mode == mode)
            .unwrap_or(usize::MAX)
    }

    pub fn mode_for_flag(&self, flag: &str) -> Option<Mode> {
        let flag = normalize_flag(flag);
        self.flags
            .iter()
            .find(|b| normalize_flag(&b.flag) == flag)
            .map(|b| b.mode)
    }

    /// 返回第一对互斥的已声明 flag
    pub fn find_conflict(&self, declared: &[String]) -> Option<(String, String)> {
        let declared: Vec<String> = declared.iter().map(|f| normalize_flag(f)).collect();
        for group in &self.exclusive_groups {
            let hits: Vec<String> = group
                .iter()
                .map(|f| normalize_flag(f))
                .filter(|f| declared.contains(f))
                .collect();
            if hits.len() >= 2 {
                return Some((hits[0].clone(), hits[1].clone()));
            }
        }
        None
    }
}

/// `--UC`、`uc`、` --uc ` 统一为 `--uc`
pub fn normalize_flag(flag: &str) -> String {
    let trimmed = flag.trim().to_lowercase();
    if trimmed.starts_with("--") {
        trimmed
    } else {
        format!("--{}", trimmed.trim_start_matches('-'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ModeTable {
        ModeTable::new(
            vec![
                ModeProfile::new(Mode::Discovery, "behavior", Orientation::Neutral),
                ModeProfile::new(Mode::CompressedCommunication, "output", Orientation::Optimization),
            ],
            vec![
                FlagBinding {
                    flag: "--brainstorm".into(),
                    mode: Mode::Discovery,
                },
                FlagBinding {
                    flag: "--uc".into(),
                    mode: Mode::CompressedCommunication,
                },
            ],
            vec![vec!["--uc".into(), "--verbose".into()]],
        )
    }

    #[test]
    fn test_flag_lookup_is_normalized() {
        let t = table();
        assert_eq!(t.mode_for_flag("UC"), Some(Mode::CompressedCommunication));
        assert_eq!(t.mode_for_flag(" --brainstorm "), Some(Mode::Discovery));
        assert_eq!(t.mode_for_flag("--unknown"), None);
    }

    #[test]
    fn test_exclusive_group_conflict() {
        let t = table();
        let declared = vec!["--verbose".to_string(), "--uc".to_string()];
        assert_eq!(
            t.find_conflict(&declared),
            Some(("--uc".to_string(), "--verbose".to_string()))
        );
        assert!(t.find_conflict(&["--uc".to_string()]).is_none());
    }

    #[test]
    fn test_orientation_rank() {
        assert!(Orientation::Safety.rank() < Orientation::Optimization.rank());
    }
}
