//! 调用监管：单次钩子调用的截止时间与取消
//!
//! 持有 CancellationToken；截止时间到达或调用方取消时，所有在途步骤都会收到信号。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 一次调用的生命周期：会话 ID、截止时间、取消令牌
#[derive(Debug, Clone)]
pub struct InvocationScope {
    session_id: String,
    deadline: Instant,
    cancel_token: CancellationToken,
}

impl InvocationScope {
    pub fn new(session_id: impl Into<String>, budget: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            deadline: Instant::now() + budget,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 剩余时间预算（已过期为 0）
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// 步骤超时：min(步骤自身超时, 剩余预算)
    pub fn step_budget(&self, step_timeout: Duration) -> Duration {
        step_timeout.min(self.remaining())
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 子 scope：共享截止时间，取消只向下传播（用于并行组的 all-or-nothing）
    pub fn child(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            deadline: self.deadline,
            cancel_token: self.cancel_token.child_token(),
        }
    }
}
