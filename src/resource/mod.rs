//! 资源管理：Green / Yellow / Orange / Red 四区状态机（带滞回）与执行策略
//!
//! 进入某区用入口阈值，离开（向下）必须低于「入口阈值 - 滞回带」，避免在边界上来回抖动。
//! 每次调用都根据最新快照重新计算，只保留上一次的分区用于滞回。

use serde::{Deserialize, Serialize};

use crate::core::{ContextSnapshot, CoreError};
use crate::routing::ExecutionPlan;

/// 资源分区（按压力递增排序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceZone {
    Green,
    Yellow,
    Orange,
    Red,
}

impl ResourceZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceZone::Green => "green",
            ResourceZone::Yellow => "yellow",
            ResourceZone::Orange => "orange",
            ResourceZone::Red => "red",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "green" => Some(ResourceZone::Green),
            "yellow" => Some(ResourceZone::Yellow),
            "orange" => Some(ResourceZone::Orange),
            "red" => Some(ResourceZone::Red),
            _ => None,
        }
    }

    fn lower(&self) -> Self {
        match self {
            ResourceZone::Green | ResourceZone::Yellow => ResourceZone::Green,
            ResourceZone::Orange => ResourceZone::Yellow,
            ResourceZone::Red => ResourceZone::Orange,
        }
    }
}

impl std::fmt::Display for ResourceZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// [resources] 段：分区入口阈值（百分比）、滞回带与并发上限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceThresholds {
    #[serde(default = "default_yellow")]
    pub yellow: f64,
    #[serde(default = "default_orange")]
    pub orange: f64,
    #[serde(default = "default_red")]
    pub red: f64,
    /// 退出阈值 = 入口阈值 - hysteresis_margin
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,
    /// Green 区的并发上限
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Orange 区的并发上限（1～2）
    #[serde(default = "default_orange_concurrency")]
    pub orange_concurrency: usize,
}

fn default_yellow() -> f64 {
    75.0
}

fn default_orange() -> f64 {
    85.0
}

fn default_red() -> f64 {
    95.0
}

fn default_hysteresis_margin() -> f64 {
    3.0
}

fn default_max_concurrency() -> usize {
    6
}

fn default_orange_concurrency() -> usize {
    2
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            yellow: default_yellow(),
            orange: default_orange(),
            red: default_red(),
            hysteresis_margin: default_hysteresis_margin(),
            max_concurrency: default_max_concurrency(),
            orange_concurrency: default_orange_concurrency(),
        }
    }
}

impl ResourceThresholds {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0 < self.yellow && self.yellow < self.orange && self.orange < self.red && self.red <= 100.0) {
            return Err(CoreError::Config(format!(
                "resource thresholds must satisfy 0 < yellow < orange < red <= 100 (got {} / {} / {})",
                self.yellow, self.orange, self.red
            )));
        }
        if self.hysteresis_margin < 0.0 || self.hysteresis_margin >= self.yellow {
            return Err(CoreError::Config(format!(
                "hysteresis_margin must be in [0, yellow) (got {})",
                self.hysteresis_margin
            )));
        }
        if self.max_concurrency == 0 {
            return Err(CoreError::Config("max_concurrency must be >= 1".into()));
        }
        Ok(())
    }

    fn entry(&self, zone: ResourceZone) -> f64 {
        match zone {
            ResourceZone::Green => 0.0,
            ResourceZone::Yellow => self.yellow,
            ResourceZone::Orange => self.orange,
            ResourceZone::Red => self.red,
        }
    }

    /// 不考虑滞回的原始分区
    pub fn raw_zone(&self, pressure: f64) -> ResourceZone {
        if pressure >= self.red {
            ResourceZone::Red
        } else if pressure >= self.orange {
            ResourceZone::Orange
        } else if pressure >= self.yellow {
            ResourceZone::Yellow
        } else {
            ResourceZone::Green
        }
    }
}

/// 各区允许的 provider 范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFilter {
    All,
    /// 非必要的优化类 provider 排到后面
    DeprioritizeOptimization,
    LightweightOnly,
    /// 只剩内置兜底 provider
    UniversalOnly,
}

/// 输出压缩级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Enabled,
    Aggressive,
}

/// 资源管理器根据分区给出的执行策略
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPolicy {
    pub zone: ResourceZone,
    pub concurrency_ceiling: usize,
    pub provider_filter: ProviderFilter,
    pub compression: Compression,
    /// Red 区：非关键步骤跳过并上报
    pub skip_non_essential: bool,
}

/// 资源管理器：只持有阈值与上一次分区
#[derive(Debug, Clone)]
pub struct ResourceManager {
    thresholds: ResourceThresholds,
    last_zone: Option<ResourceZone>,
}

impl ResourceManager {
    pub fn new(thresholds: ResourceThresholds, last_zone: Option<ResourceZone>) -> Self {
        Self {
            thresholds,
            last_zone,
        }
    }

    pub fn last_zone(&self) -> Option<ResourceZone> {
        self.last_zone
    }

    /// 根据快照计算当前分区：升区立即生效，降区需跌破退出阈值
    pub fn current_zone(&mut self, context: &ContextSnapshot) -> ResourceZone {
        let pressure = context.pressure();
        let raw = self.thresholds.raw_zone(pressure);

        let zone = match self.last_zone {
            Some(last) if raw < last => {
                let mut z = last;
                while z > raw
                    && pressure < self.thresholds.entry(z) - self.thresholds.hysteresis_margin
                {
                    z = z.lower();
                }
                z
            }
            _ => raw,
        };

        if self.last_zone != Some(zone) {
            tracing::info!(
                from = ?self.last_zone.map(|z| z.as_str()),
                to = zone.as_str(),
                pressure,
                "resource zone transition"
            );
        }
        self.last_zone = Some(zone);
        zone
    }

    pub fn provider_filter(zone: ResourceZone) -> ProviderFilter {
        match zone {
            ResourceZone::Green => ProviderFilter::All,
            ResourceZone::Yellow => ProviderFilter::DeprioritizeOptimization,
            ResourceZone::Orange => ProviderFilter::LightweightOnly,
            ResourceZone::Red => ProviderFilter::UniversalOnly,
        }
    }

    /// 分区对应的并发上限
    pub fn zone_ceiling(&self, zone: ResourceZone) -> usize {
        let max = self.thresholds.max_concurrency.max(1);
        match zone {
            ResourceZone::Green => max,
            ResourceZone::Yellow => (max / 2).max(1),
            ResourceZone::Orange => self.thresholds.orange_concurrency.clamp(1, 2).min(max),
            ResourceZone::Red => 1,
        }
    }

    /// 为计划生成执行策略；并发上限同时受计划自身的并发提示约束
    pub fn adapt(&self, zone: ResourceZone, plan: &ExecutionPlan) -> ExecutionPolicy {
        let ceiling = self
            .zone_ceiling(zone)
            .min(plan.concurrency_hint.max(1));
        ExecutionPolicy {
            zone,
            concurrency_ceiling: ceiling,
            provider_filter: Self::provider_filter(zone),
            compression: match zone {
                ResourceZone::Green => Compression::None,
                ResourceZone::Yellow => Compression::Enabled,
                ResourceZone::Orange | ResourceZone::Red => Compression::Aggressive,
            },
            skip_non_essential: zone == ResourceZone::Red,
        }
    }
}
