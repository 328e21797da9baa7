//! 错误恢复引擎
//!
//! 根据 CoreError 类型返回 RecoveryAction，供执行协调器决定是切换回退、跳过还是终止。

use crate::core::{CoreError, RecoveryAction};

/// 步骤级错误恢复：把 provider 失败映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `has_fallback` 表示回退链中是否还有未尝试的 provider
    pub fn handle(&self, err: &CoreError, has_fallback: bool) -> RecoveryAction {
        match err {
            CoreError::ProviderFailed { .. }
            | CoreError::ProviderTimeout(_)
            | CoreError::UnknownProvider(_)
                if has_fallback =>
            {
                RecoveryAction::FallbackToNext
            }
            CoreError::ProviderFailed { provider, reason } => RecoveryAction::SkipAndReport(
                format!("fallback chain exhausted at {provider}: {reason}"),
            ),
            CoreError::ProviderTimeout(provider) => RecoveryAction::SkipAndReport(format!(
                "fallback chain exhausted, {provider} timed out"
            )),
            CoreError::UnknownProvider(name) => {
                RecoveryAction::SkipAndReport(format!("no provider registered as {name}"))
            }
            CoreError::DeadlineExceeded | CoreError::Cancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}
