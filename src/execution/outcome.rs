//! 步骤状态与执行结果

use serde::Serialize;

/// 步骤状态：Pending → Running → {Completed | Failed | TimedOut | Skipped}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::TimedOut)
    }
}

/// 对单个 provider 的一次尝试
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub provider: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// 一个步骤的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub status: StepStatus,
    /// 产出最终结果（或最后尝试）的 provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub attempts: Vec<Attempt>,
    /// 主 provider 之外的 provider 完成了该步骤
    pub fallback_used: bool,
    pub essential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// 失败 / 跳过原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    /// 委派步骤的子计划结果
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExecutionResult>,
}

impl StepOutcome {
    pub fn pending(step_id: &str, essential: bool) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            provider: None,
            attempts: Vec::new(),
            fallback_used: false,
            essential,
            output: None,
            reason: None,
            duration_ms: 0,
            children: Vec::new(),
        }
    }

    pub fn skipped(step_id: &str, essential: bool, reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            reason: Some(reason.into()),
            ..Self::pending(step_id, essential)
        }
    }

    /// 一行人类可读的说明：哪个步骤、为什么、用了哪个回退
    pub fn describe(&self) -> String {
        let mut s = format!("{}: {}", self.step_id, self.status.as_str());
        if let Some(p) = &self.provider {
            s.push_str(&format!(" via {}", p));
            if self.fallback_used {
                s.push_str(" (fallback)");
            }
        }
        if let Some(r) = &self.reason {
            s.push_str(&format!(" ({})", r));
        }
        s
    }
}

/// 一个计划的执行结果；步骤按计划中的声明顺序排列
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub outcomes: Vec<StepOutcome>,
    /// 顺序链因失败提前终止
    pub halted: bool,
    /// 调用截止时间耗尽
    pub deadline_exceeded: bool,
}

impl ExecutionResult {
    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step_id == step_id)
    }

    /// 整棵树的所有步骤结果（前序）
    pub fn flatten(&self) -> Vec<&StepOutcome> {
        let mut out = Vec::new();
        for o in &self.outcomes {
            out.push(o);
            for child in &o.children {
                out.extend(child.flatten());
            }
        }
        out
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == StepStatus::Completed)
    }

    /// 所有关键步骤都已完成（非关键步骤的跳过或失败不计）
    pub fn essential_ok(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.essential)
            .all(|o| o.status == StepStatus::Completed)
    }

    pub fn skipped(&self) -> Vec<&StepOutcome> {
        self.flatten()
            .into_iter()
            .filter(|o| o.status == StepStatus::Skipped)
            .collect()
    }

    pub fn failures(&self) -> Vec<&StepOutcome> {
        self.flatten()
            .into_iter()
            .filter(|o| o.status.is_failure())
            .collect()
    }

    pub fn any_deadline_exceeded(&self) -> bool {
        self.deadline_exceeded
            || self
                .outcomes
                .iter()
                .any(|o| o.children.iter().any(|c| c.any_deadline_exceeded()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_and_filters() {
        let mut child_step = StepOutcome::pending("execute.frontend", true);
        child_step.status = StepStatus::TimedOut;
        let child = ExecutionResult {
            plan_id: "c".into(),
            outcomes: vec![child_step],
            ..Default::default()
        };
        let mut parent = StepOutcome::pending("execute", true);
        parent.status = StepStatus::Failed;
        parent.children = vec![child];

        let result = ExecutionResult {
            plan_id: "root".into(),
            outcomes: vec![parent, StepOutcome::skipped("validate", true, "halted")],
            ..Default::default()
        };
        assert_eq!(result.flatten().len(), 3);
        assert_eq!(result.failures().len(), 2);
        assert_eq!(result.skipped()[0].step_id, "validate");
        assert!(!result.is_success());
    }

    #[test]
    fn test_describe_mentions_fallback() {
        let mut o = StepOutcome::pending("execute", true);
        o.status = StepStatus::Completed;
        o.provider = Some("symbol-index".into());
        o.fallback_used = true;
        assert_eq!(o.describe(), "execute: completed via symbol-index (fallback)");
    }
}
