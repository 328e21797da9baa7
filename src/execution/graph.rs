//! 步骤依赖图
//!
//! 使用邻接表和入度表跟踪同一计划内 depends_on 关系；结果按声明顺序返回，保证可复现。

use std::collections::{HashMap, HashSet};

use crate::routing::Step;

/// 计划内的步骤依赖图
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// 声明顺序
    order: Vec<String>,
    /// 步骤 ID -> 依赖它的步骤
    adjacency: HashMap<String, Vec<String>>,
    /// 步骤 ID -> 未完成的依赖数
    in_degree: HashMap<String, usize>,
    /// 依赖了计划中不存在的步骤
    dangling: HashMap<String, Vec<String>>,
}

impl StepGraph {
    pub fn new(steps: &[Step]) -> Self {
        let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree = HashMap::new();
        let mut dangling: HashMap<String, Vec<String>> = HashMap::new();

        for step in steps {
            in_degree.insert(step.id.clone(), 0);
            adjacency.entry(step.id.clone()).or_default();
        }
        for step in steps {
            for dep in &step.depends_on {
                if ids.contains(dep.as_str()) && dep != &step.id {
                    adjacency.entry(dep.clone()).or_default().push(step.id.clone());
                    *in_degree.entry(step.id.clone()).or_insert(0) += 1;
                } else {
                    dangling.entry(step.id.clone()).or_default().push(dep.clone());
                }
            }
        }

        Self {
            order: steps.iter().map(|s| s.id.clone()).collect(),
            adjacency,
            in_degree,
            dangling,
        }
    }

    /// 依赖缺失的步骤及其缺失的依赖
    pub fn dangling(&self, step_id: &str) -> Option<&[String]> {
        self.dangling.get(step_id).map(|v| v.as_slice())
    }

    /// 入度为 0 且未在 `started` 中的步骤（声明顺序）
    pub fn ready(&self, started: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !started.contains(*id))
            .filter(|id| self.in_degree.get(*id).copied().unwrap_or(0) == 0)
            .filter(|id| !self.dangling.contains_key(*id))
            .cloned()
            .collect()
    }

    /// 步骤成功完成，返回新变为可执行的步骤
    pub fn mark_completed(&mut self, step_id: &str) -> Vec<String> {
        let mut newly_ready = Vec::new();
        if let Some(dependents) = self.adjacency.get(step_id) {
            for dependent in dependents {
                if let Some(degree) = self.in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        newly_ready.push(dependent.clone());
                    }
                }
            }
        }
        newly_ready
    }

    /// 步骤未成功：返回所有（传递）依赖它、因而不能再执行的步骤（声明顺序）
    pub fn blocked_by(&self, step_id: &str) -> Vec<String> {
        let mut blocked = HashSet::new();
        let mut stack = vec![step_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for d in dependents {
                    if blocked.insert(d.clone()) {
                        stack.push(d.clone());
                    }
                }
            }
        }
        self.order
            .iter()
            .filter(|id| blocked.contains(*id))
            .cloned()
            .collect()
    }

    /// 依赖环上的步骤（Kahn 算法剩余的节点）
    pub fn cycle_members(&self) -> Vec<String> {
        let mut degree = self.in_degree.clone();
        let mut queue: Vec<String> = self
            .order
            .iter()
            .filter(|id| degree.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop() {
            visited.insert(id.clone());
            if let Some(dependents) = self.adjacency.get(&id) {
                for d in dependents {
                    if let Some(deg) = degree.get_mut(d) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            queue.push(d.clone());
                        }
                    }
                }
            }
        }
        self.order
            .iter()
            .filter(|id| !visited.contains(*id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<Step> {
        vec![
            Step::provider("a", "p", 10),
            Step::provider("b", "p", 10).depends_on(&["a"]),
            Step::provider("c", "p", 10).depends_on(&["b"]),
            Step::provider("d", "p", 10),
        ]
    }

    #[test]
    fn test_ready_and_completion() {
        let mut g = StepGraph::new(&steps());
        let started = HashSet::new();
        assert_eq!(g.ready(&started), vec!["a", "d"]);
        assert_eq!(g.mark_completed("a"), vec!["b"]);
        assert_eq!(g.blocked_by("b"), vec!["c"]);
        assert_eq!(g.blocked_by("a"), vec!["b", "c"]);
    }

    #[test]
    fn test_dangling_and_cycles() {
        let steps = vec![
            Step::provider("a", "p", 10).depends_on(&["ghost"]),
            Step::provider("b", "p", 10).depends_on(&["c"]),
            Step::provider("c", "p", 10).depends_on(&["b"]),
        ];
        let g = StepGraph::new(&steps);
        assert_eq!(g.dangling("a"), Some(&["ghost".to_string()][..]));
        assert!(g.ready(&HashSet::new()).is_empty());
        assert_eq!(g.cycle_members(), vec!["b", "c"]);
    }
}
