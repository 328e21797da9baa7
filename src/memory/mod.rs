//! 记忆层：分层键、会话检查点存储、检查点触发器、结果日志与路由偏置

pub mod keys;
pub mod learning;
pub mod store;
pub mod triggers;

pub use keys::RecordKind;
pub use learning::{aggregate, OutcomeEvent, OutcomeLog, ProviderStats, ProviderTally, RoutingBias};
pub use store::{Checkpoint, MemoryRecord, MemoryStore, RetentionPolicy, SweepReport};
pub use triggers::{CheckpointReason, CheckpointTriggerConfig, CheckpointTriggers, TriggerInput};
