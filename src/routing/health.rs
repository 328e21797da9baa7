//! 单次调用内的 provider 可用性：健康检查失败或前序步骤失败后即被排除

use std::collections::BTreeMap;
use std::sync::Mutex;

/// provider 可用性表；兜底 provider 永远可用
#[derive(Debug)]
pub struct ProviderHealth {
    universal: String,
    unavailable: Mutex<BTreeMap<String, String>>,
}

impl ProviderHealth {
    pub fn new(universal: impl Into<String>) -> Self {
        Self {
            universal: universal.into(),
            unavailable: Mutex::new(BTreeMap::new()),
        }
    }

    /// 标记不可用（本次调用剩余时间内生效）；对兜底 provider 无效
    pub fn mark_unavailable(&self, provider: &str, reason: impl Into<String>) {
        if provider == self.universal {
            return;
        }
        let reason = reason.into();
        tracing::warn!(provider, reason = %reason, "provider marked unavailable");
        self.lock().entry(provider.to_string()).or_insert(reason);
    }

    pub fn is_available(&self, provider: &str) -> bool {
        provider == self.universal || !self.lock().contains_key(provider)
    }

    pub fn reason(&self, provider: &str) -> Option<String> {
        self.lock().get(provider).cloned()
    }

    pub fn unavailable(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn universal(&self) -> &str {
        &self.universal
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // 被毒化时沿用内部数据
        self.unavailable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universal_cannot_be_marked() {
        let h = ProviderHealth::new("native");
        h.mark_unavailable("native", "boom");
        h.mark_unavailable("deep-reasoning", "timeout");
        assert!(h.is_available("native"));
        assert!(!h.is_available("deep-reasoning"));
        assert_eq!(h.reason("deep-reasoning").as_deref(), Some("timeout"));
    }

    #[test]
    fn test_first_reason_is_kept() {
        let h = ProviderHealth::new("native");
        h.mark_unavailable("p", "health check failed");
        h.mark_unavailable("p", "step failed");
        assert_eq!(h.unavailable(), vec![("p".to_string(), "health check failed".to_string())]);
    }
}
