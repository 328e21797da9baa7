//! Provider 注册表
//!
//! 所有 provider 实现 Provider trait（name / health_check / execute），由 ProviderRegistry 按名注册与查找；
//! 执行协调器在调用时加超时、记录审计日志并处理回退。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;

use crate::resource::Compression;
use crate::routing::{ProviderCatalog, ProviderHealth, ProviderSpec};

/// 下发给 provider 的一个步骤
#[derive(Debug, Clone, Serialize)]
pub struct StepTask {
    pub request_id: String,
    pub session_id: String,
    pub step_id: String,
    pub instruction: String,
    pub target_paths: Vec<String>,
    pub compression: Compression,
    /// 第几次尝试（0 为主 provider）
    pub attempt: usize,
}

/// Provider trait：名称、健康检查、异步执行
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 调用前的健康检查；返回 false 时本次调用内不再使用
    async fn health_check(&self) -> bool {
        true
    }

    async fn execute(&self, task: &StepTask) -> Result<String, String>;
}

/// Provider 注册表：按名称存储 Arc<dyn Provider>
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Provider + 'static) {
        self.register_arc(Arc::new(provider));
    }

    pub fn register_arc(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 目录中每个 provider 注册一个委派型实现，兜底 provider 注册为内置实现
    pub fn from_catalog(catalog: &ProviderCatalog) -> Self {
        let mut registry = Self::new();
        for spec in catalog.specs() {
            if spec.name == catalog.universal() {
                registry.register(NativeProvider::new(&spec.name));
            } else {
                registry.register(AdvisoryProvider::new(spec.clone()));
            }
        }
        registry
    }

    /// 并发执行健康检查；未注册或检查失败的 provider 标记为不可用
    pub async fn check_health(&self, catalog: &ProviderCatalog, health: &ProviderHealth) {
        let checks = catalog.specs().iter().map(|spec| async move {
            match self.get(&spec.name) {
                Some(p) => (spec.name.as_str(), p.health_check().await, "health check failed"),
                None => (spec.name.as_str(), false, "no provider registered"),
            }
        });
        for (name, ok, reason) in join_all(checks).await {
            if !ok {
                health.mark_unavailable(name, reason);
            }
        }
    }
}

/// 内置兜底 provider：不依赖任何外部能力，返回交由宿主手动处理的指引
pub struct NativeProvider {
    name: String,
}

impl NativeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Provider for NativeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "built-in manual/native handling"
    }

    async fn execute(&self, task: &StepTask) -> Result<String, String> {
        let out = serde_json::json!({
            "provider": self.name,
            "mode": "native",
            "step": task.step_id,
            "instruction": task.instruction,
            "paths": task.target_paths,
        });
        Ok(out.to_string())
    }
}

/// 委派型 provider：真正的能力由宿主提供，这里产出结构化的委派记录
pub struct AdvisoryProvider {
    spec: ProviderSpec,
}

impl AdvisoryProvider {
    pub fn new(spec: ProviderSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Provider for AdvisoryProvider {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    async fn execute(&self, task: &StepTask) -> Result<String, String> {
        let out = serde_json::json!({
            "provider": self.spec.name,
            "mode": "delegate",
            "step": task.step_id,
            "instruction": task.instruction,
            "paths": task.target_paths,
            "compression": task.compression,
        });
        Ok(out.to_string())
    }
}
