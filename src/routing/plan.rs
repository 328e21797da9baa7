//! 执行计划：由路由引擎构建、执行协调器只读消费
//!
//! 计划是一棵树：普通步骤派发给 provider，委派步骤挂若干子计划（分层委派）。

use serde::Serialize;

/// 计划内步骤的编排方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PlanMode {
    /// 按声明顺序执行；失败且 break_on_error 时终止后续步骤
    Sequential { break_on_error: bool },
    /// 在并发上限内并行；all_or_nothing 时任一失败取消兄弟步骤
    Parallel { all_or_nothing: bool },
}

/// 步骤内容
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepKind {
    /// 派发给 provider；失败时依次尝试 fallbacks
    Provider {
        provider: String,
        fallbacks: Vec<String>,
    },
    /// 分层委派：所有子计划到达终态后父步骤才完成
    Delegate {
        children: Vec<ExecutionPlan>,
        /// 子树可选：子计划失败不向上传播
        optional: bool,
    },
}

/// 计划中的一个步骤
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub timeout_ms: u64,
    pub depends_on: Vec<String>,
    /// 非关键步骤在 Red 区被跳过并上报
    pub essential: bool,
    pub instruction: String,
    pub target_paths: Vec<String>,
}

impl Step {
    pub fn provider(id: impl Into<String>, provider: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Provider {
                provider: provider.into(),
                fallbacks: Vec::new(),
            },
            timeout_ms,
            depends_on: Vec::new(),
            essential: true,
            instruction: String::new(),
            target_paths: Vec::new(),
        }
    }

    pub fn delegate(id: impl Into<String>, children: Vec<ExecutionPlan>, timeout_ms: u64) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Delegate {
                children,
                optional: false,
            },
            timeout_ms,
            depends_on: Vec::new(),
            essential: true,
            instruction: String::new(),
            target_paths: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, chain: Vec<String>) -> Self {
        if let StepKind::Provider { fallbacks, .. } = &mut self.kind {
            *fallbacks = chain;
        }
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }

    pub fn optional_subtree(mut self) -> Self {
        if let StepKind::Delegate { optional, .. } = &mut self.kind {
            *optional = true;
        }
        self
    }

    pub fn with_instruction(mut self, text: impl Into<String>) -> Self {
        self.instruction = text.into();
        self
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.target_paths = paths;
        self
    }

    /// 主 provider（委派步骤为 None）
    pub fn primary_provider(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Provider { provider, .. } => Some(provider),
            StepKind::Delegate { .. } => None,
        }
    }
}

/// 执行计划
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub mode: PlanMode,
    pub steps: Vec<Step>,
    /// 路由给出的并发提示（还会被资源策略进一步收紧）
    pub concurrency_hint: usize,
}

impl ExecutionPlan {
    pub fn sequential(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            mode: PlanMode::Sequential {
                break_on_error: true,
            },
            steps,
            concurrency_hint: 1,
        }
    }

    pub fn parallel(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            mode: PlanMode::Parallel {
                all_or_nothing: false,
            },
            steps,
            concurrency_hint: 1,
        }
    }

    pub fn with_concurrency_hint(mut self, hint: usize) -> Self {
        self.concurrency_hint = hint.max(1);
        self
    }

    pub fn with_mode(mut self, mode: PlanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// 计划树中的步骤总数（含子计划）
    pub fn total_steps(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match &s.kind {
                StepKind::Provider { .. } => 1,
                StepKind::Delegate { children, .. } => {
                    1 + children.iter().map(|c| c.total_steps()).sum::<usize>()
                }
            })
            .sum()
    }

    /// 遍历整棵树的步骤（前序）
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a ExecutionPlan, &'a Step)) {
        for step in &self.steps {
            f(self, step);
            if let StepKind::Delegate { children, .. } = &step.kind {
                for child in children {
                    child.walk(f);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_steps_counts_children() {
        let child_a = ExecutionPlan::sequential("a", vec![Step::provider("a1", "p", 100)]);
        let child_b = ExecutionPlan::sequential(
            "b",
            vec![Step::provider("b1", "p", 100), Step::provider("b2", "p", 100)],
        );
        let plan = ExecutionPlan::parallel(
            "root",
            vec![Step::delegate("split", vec![child_a, child_b], 1000)],
        );
        assert_eq!(plan.total_steps(), 4);

        let mut ids = Vec::new();
        plan.walk(&mut |_, s| ids.push(s.id.clone()));
        assert_eq!(ids, vec!["split", "a1", "b1", "b2"]);
    }

    #[test]
    fn test_builder_helpers() {
        let step = Step::provider("s", "p", 10)
            .with_fallbacks(vec!["q".into()])
            .depends_on(&["r"])
            .non_essential();
        assert_eq!(step.primary_provider(), Some("p"));
        assert!(!step.essential);
        assert_eq!(step.depends_on, vec!["r"]);
        match step.kind {
            StepKind::Provider { fallbacks, .. } => assert_eq!(fallbacks, vec!["q"]),
            _ => panic!("expected provider step"),
        }
    }
}
