//! 路由层：任务分类、决策矩阵、provider 可用性与执行计划构建

pub mod classifier;
pub mod engine;
pub mod health;
pub mod matrix;
pub mod plan;

pub use classifier::{Classification, DomainSignals, TaskClassifier, TaskKeywords};
pub use engine::{ExcludedProvider, RoutingDecision, RoutingEngine, RoutingSettings, SubRoute};
pub use health::ProviderHealth;
pub use matrix::{DecisionMatrix, DomainTag, MatrixRow, ProviderCatalog, ProviderSpec, TaskType};
pub use plan::{ExecutionPlan, PlanMode, Step, StepKind};
