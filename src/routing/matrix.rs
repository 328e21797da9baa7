//! 决策矩阵：(任务类型, 领域) → {主 provider, 回退链, 可并行, 最低置信度}
//!
//! 矩阵与 provider 目录都是配置数据，加载时校验：
//! 每一行引用的 provider 必须在目录中，且必须存在 (general, any) 兜底行。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::CoreError;

/// 任务类型（矩阵行键之一）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Discovery,
    Analysis,
    Implementation,
    Refactor,
    Testing,
    Documentation,
    Coordination,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Discovery => "discovery",
            TaskType::Analysis => "analysis",
            TaskType::Implementation => "implementation",
            TaskType::Refactor => "refactor",
            TaskType::Testing => "testing",
            TaskType::Documentation => "documentation",
            TaskType::Coordination => "coordination",
            TaskType::General => "general",
        }
    }
}

/// 领域标签（矩阵行键之二）；`Any` 为通配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    Frontend,
    Backend,
    Security,
    Infrastructure,
    Data,
    Docs,
    Any,
}

impl DomainTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::Frontend => "frontend",
            DomainTag::Backend => "backend",
            DomainTag::Security => "security",
            DomainTag::Infrastructure => "infrastructure",
            DomainTag::Data => "data",
            DomainTag::Docs => "docs",
            DomainTag::Any => "any",
        }
    }
}

/// provider 目录中的一项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Orange 区仍可使用
    #[serde(default)]
    pub lightweight: bool,
    /// 非必要的优化类 provider（Yellow 区降级排序）
    #[serde(default)]
    pub optimization: bool,
}

impl ProviderSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            lightweight: false,
            optimization: false,
        }
    }

    pub fn lightweight(mut self) -> Self {
        self.lightweight = true;
        self
    }

    pub fn optimization(mut self) -> Self {
        self.optimization = true;
        self
    }
}

/// provider 目录：按名查找；兜底 provider 总是存在且为轻量
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    specs: Vec<ProviderSpec>,
    universal: String,
}

impl ProviderCatalog {
    pub fn new(mut specs: Vec<ProviderSpec>, universal: &str) -> Self {
        match specs.iter_mut().find(|s| s.name == universal) {
            Some(spec) => spec.lightweight = true,
            None => specs.push(
                ProviderSpec::new(universal, "built-in manual/native handling").lightweight(),
            ),
        }
        Self {
            specs,
            universal: universal.to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn universal(&self) -> &str {
        &self.universal
    }

    pub fn specs(&self) -> &[ProviderSpec] {
        &self.specs
    }
}

/// 矩阵的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixRow {
    pub task_type: TaskType,
    pub domain: DomainTag,
    pub primary: String,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub parallelizable: bool,
    #[serde(default)]
    pub min_confidence: f64,
    /// 该行建议的并发度
    #[serde(default = "default_concurrency_hint")]
    pub concurrency_hint: usize,
    /// 覆盖默认的步骤超时（毫秒）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_concurrency_hint() -> usize {
    1
}

impl MatrixRow {
    pub fn new(task_type: TaskType, domain: DomainTag, primary: &str, fallback: &[&str]) -> Self {
        Self {
            task_type,
            domain,
            primary: primary.to_string(),
            fallback_chain: fallback.iter().map(|s| s.to_string()).collect(),
            parallelizable: false,
            min_confidence: 0.0,
            concurrency_hint: default_concurrency_hint(),
            timeout_ms: None,
        }
    }

    pub fn parallel(mut self, hint: usize) -> Self {
        self.parallelizable = true;
        self.concurrency_hint = hint.max(1);
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    /// 主 provider + 回退链（按声明顺序，去重）
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.fallback_chain.len() + 1);
        for name in std::iter::once(&self.primary).chain(self.fallback_chain.iter()) {
            if !out.contains(&name.as_str()) {
                out.push(name.as_str());
            }
        }
        out
    }
}

/// 编译后的决策矩阵
#[derive(Debug, Clone)]
pub struct DecisionMatrix {
    rows: Vec<MatrixRow>,
    index: HashMap<(TaskType, DomainTag), usize>,
}

impl DecisionMatrix {
    pub fn new(rows: Vec<MatrixRow>, catalog: &ProviderCatalog) -> Result<Self, CoreError> {
        let mut index = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            for name in row.candidates() {
                if !catalog.contains(name) {
                    return Err(CoreError::Config(format!(
                        "matrix row ({}, {}) references unknown provider `{}`",
                        row.task_type.as_str(),
                        row.domain.as_str(),
                        name
                    )));
                }
            }
            if !(0.0..=1.0).contains(&row.min_confidence) {
                return Err(CoreError::Config(format!(
                    "matrix row ({}, {}) min_confidence must be within [0, 1]",
                    row.task_type.as_str(),
                    row.domain.as_str()
                )));
            }
            if index.insert((row.task_type, row.domain), i).is_some() {
                return Err(CoreError::Config(format!(
                    "duplicate matrix row ({}, {})",
                    row.task_type.as_str(),
                    row.domain.as_str()
                )));
            }
        }
        if !index.contains_key(&(TaskType::General, DomainTag::Any)) {
            return Err(CoreError::Config(
                "decision matrix must contain a (general, any) row".into(),
            ));
        }
        Ok(Self { rows, index })
    }

    /// 查找顺序：(task, domain) → (task, any) → (general, any)
    pub fn lookup(&self, task: TaskType, domain: DomainTag) -> &MatrixRow {
        let i = self
            .index
            .get(&(task, domain))
            .or_else(|| self.index.get(&(task, DomainTag::Any)))
            .or_else(|| self.index.get(&(TaskType::General, DomainTag::Any)))
            .copied()
            .unwrap_or(0);
        &self.rows[i]
    }

    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    /// 用新的回退链替换（用于离线聚合出的路由偏置）
    pub fn with_rows_mapped(&self, f: impl Fn(&MatrixRow) -> MatrixRow) -> Self {
        Self {
            rows: self.rows.iter().map(f).collect(),
            index: self.index.clone(),
        }
    }
}
