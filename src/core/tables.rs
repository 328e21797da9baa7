//! 运行时表：由配置编译出的强类型规则表、矩阵与阈值
//!
//! 整套表一次编译完成后通过 watch 通道原子替换；每次调用开始时取一个 Arc 快照，
//! 调用期间不会看到部分更新。

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{AppConfig, TimeoutsSection};
use crate::core::CoreError;
use crate::detector::{compile_rules, ModeTable, SignalDetector};
use crate::gates::{GateConfig, GatePipeline};
use crate::memory::{CheckpointTriggers, RetentionPolicy, RoutingBias};
use crate::resource::ResourceThresholds;
use crate::routing::{DecisionMatrix, ProviderCatalog, RoutingEngine, RoutingSettings, TaskClassifier};

/// 一套编译好的运行时表
pub struct RuntimeTables {
    pub detector: SignalDetector,
    pub routing: RoutingEngine,
    pub thresholds: ResourceThresholds,
    pub gates: GatePipeline,
    pub gate_config: GateConfig,
    pub triggers: CheckpointTriggers,
    pub retention: RetentionPolicy,
    pub timeouts: TimeoutsSection,
    pub health_check: bool,
    /// 每次 reload 加一
    pub version: u64,
}

impl RuntimeTables {
    /// 编译并校验全部表；任何一张表无效则整体失败
    pub fn from_config(config: &AppConfig, bias: Option<&RoutingBias>) -> Result<Self, CoreError> {
        config.resources.validate()?;
        config.retention.validate()?;

        let rules = compile_rules(&config.rules)?;
        let modes = ModeTable::new(
            config.modes.clone(),
            config.flags.clone(),
            config.exclusive_flags.clone(),
        );

        let catalog = ProviderCatalog::new(config.providers.clone(), &config.app.universal_provider);
        let mut matrix = DecisionMatrix::new(config.matrix.clone(), &catalog)?;
        if let Some(bias) = bias.filter(|_| config.routing.use_bias) {
            matrix = matrix.with_rows_mapped(|row| bias.apply(row));
        }

        let classifier = TaskClassifier::new(
            config.task_keywords.clone(),
            config.domains.clone(),
            config.app.keyword_hit_weight,
        );
        let settings = RoutingSettings {
            default_timeout_ms: config.routing.default_timeout_ms,
            split_min_domains: config.routing.split_min_domains,
            validation_provider: config.routing.validation_provider.clone(),
            break_on_error: config.routing.break_on_error,
        };
        let routing = RoutingEngine::new(matrix, catalog, classifier, &modes, settings);
        let detector = SignalDetector::new(rules, modes, config.app.min_text_chars);
        let gates = GatePipeline::from_config(&config.gates)?;

        Ok(Self {
            detector,
            routing,
            thresholds: config.resources.clone(),
            gates,
            gate_config: config.gates.clone(),
            triggers: CheckpointTriggers::new(config.checkpoint.clone()),
            retention: config.retention.clone(),
            timeouts: config.timeouts.clone(),
            health_check: config.app.health_check,
            version: 0,
        })
    }
}

/// 当前运行时表的句柄（可克隆，多个调用共享）
#[derive(Clone)]
pub struct TableHandle {
    tx: Arc<watch::Sender<Arc<RuntimeTables>>>,
    rx: watch::Receiver<Arc<RuntimeTables>>,
}

impl TableHandle {
    pub fn new(tables: RuntimeTables) -> Self {
        let (tx, rx) = watch::channel(Arc::new(tables));
        Self { tx: Arc::new(tx), rx }
    }

    pub fn from_config(config: &AppConfig, bias: Option<&RoutingBias>) -> Result<Self, CoreError> {
        Ok(Self::new(RuntimeTables::from_config(config, bias)?))
    }

    /// 当前表的快照
    pub fn current(&self) -> Arc<RuntimeTables> {
        self.rx.borrow().clone()
    }

    /// 编译新表并整体替换；编译失败时保留旧表
    pub fn reload(&self, config: &AppConfig, bias: Option<&RoutingBias>) -> Result<u64, CoreError> {
        let mut next = RuntimeTables::from_config(config, bias)?;
        next.version = self.current().version + 1;
        let version = next.version;
        self.tx.send_replace(Arc::new(next));
        tracing::info!(version, "runtime tables reloaded");
        Ok(version)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RuntimeTables>> {
        self.tx.subscribe()
    }
}
