//! 执行层：provider 注册表、步骤依赖图、执行协调器与步骤结果

pub mod coordinator;
pub mod graph;
pub mod outcome;
pub mod provider;

pub use coordinator::{ExecutionCoordinator, StepEvent};
pub use graph::StepGraph;
pub use outcome::{Attempt, ExecutionResult, StepOutcome, StepStatus};
pub use provider::{AdvisoryProvider, NativeProvider, Provider, ProviderRegistry, StepTask};
