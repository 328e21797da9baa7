//! 核心编排层：请求模型、错误与恢复、调用监管、并发限制、运行时表与主控流程

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod request;
pub mod scheduler;
pub mod session;
pub mod tables;

pub use error::{CoreError, RecoveryAction, StoreError};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use request::{ContextSnapshot, Request};
pub use scheduler::{ConcurrencyLimiter, StepPermit};
pub use session::InvocationScope;
pub use tables::{RuntimeTables, TableHandle};
