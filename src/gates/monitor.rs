//! 执行中门禁：消费执行协调器的步骤事件，发现慢步骤与失败尝试
//!
//! 发送端全部关闭后 run 返回汇总报告。配置了存储时，第一次失败就立即写错误检查点，
//! 不等整个计划结束。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::execution::StepEvent;
use crate::gates::{GateResult, GateStage, Severity};
use crate::memory::{CheckpointReason, MemoryStore};

/// 执行中门禁的汇总
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub results: Vec<GateResult>,
    /// 出现失败尝试，需要错误检查点
    pub checkpoint_requested: bool,
    /// 执行途中已写入的错误检查点
    pub checkpoint_id: Option<String>,
}

struct InFlight {
    started: Instant,
    timeout_ms: u64,
    warned: bool,
}

/// 执行中监控
pub struct InFlightMonitor {
    slow_ratio: f64,
    sample_interval: Duration,
    checkpoint: Option<(MemoryStore, DateTime<Utc>)>,
}

impl InFlightMonitor {
    pub fn new(slow_ratio: f64, sample_interval: Duration) -> Self {
        Self {
            slow_ratio: slow_ratio.clamp(0.05, 1.0),
            sample_interval: sample_interval.max(Duration::from_millis(10)),
            checkpoint: None,
        }
    }

    /// 失败时向该存储写错误检查点（时刻取调用时间戳，与执行后的触发器去重）
    pub fn with_checkpoint(mut self, store: MemoryStore, at: DateTime<Utc>) -> Self {
        self.checkpoint = Some((store, at));
        self
    }

    async fn early_checkpoint(&self, step_id: &str) -> Option<String> {
        let (store, at) = self.checkpoint.as_ref()?;
        match store.checkpoint_at(CheckpointReason::Error, *at).await {
            Ok(id) => {
                tracing::info!(session_id = %store.session_id(), checkpoint = %id, step_id, "early checkpoint after step failure");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(session_id = %store.session_id(), step_id, error = %e, "early checkpoint failed");
                None
            }
        }
    }

    fn slow_threshold(&self, timeout_ms: u64) -> Duration {
        Duration::from_millis((timeout_ms as f64 * self.slow_ratio) as u64)
    }

    fn slow_warning(step_id: &str, provider: &str, elapsed: Duration, timeout_ms: u64) -> GateResult {
        GateResult::fail(
            GateStage::During,
            Severity::Warning,
            "during.slow_step",
            format!(
                "step {} on {} running {}ms of {}ms budget",
                step_id,
                provider,
                elapsed.as_millis(),
                timeout_ms
            ),
        )
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<StepEvent>) -> MonitorReport {
        let mut report = MonitorReport::default();
        let mut in_flight: HashMap<(String, String), InFlight> = HashMap::new();
        let mut ticker = interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        StepEvent::Started { step_id, provider, timeout_ms } => {
                            in_flight.insert(
                                (step_id, provider),
                                InFlight { started: Instant::now(), timeout_ms, warned: false },
                            );
                        }
                        StepEvent::Finished { step_id, provider, status, duration_ms } => {
                            let entry = in_flight.remove(&(step_id.clone(), provider.clone()));
                            if let Some(f) = entry {
                                let elapsed = Duration::from_millis(duration_ms);
                                if !f.warned && elapsed >= self.slow_threshold(f.timeout_ms) && !status.is_failure() {
                                    report.results.push(Self::slow_warning(&step_id, &provider, elapsed, f.timeout_ms));
                                }
                            }
                            if status.is_failure() {
                                report.results.push(GateResult::fail(
                                    GateStage::During,
                                    Severity::Warning,
                                    "during.step_failure",
                                    format!("step {} {} on {}", step_id, status.as_str(), provider),
                                ));
                                report.checkpoint_requested = true;
                                if report.checkpoint_id.is_none() {
                                    report.checkpoint_id = self.early_checkpoint(&step_id).await;
                                }
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    for ((step_id, provider), f) in in_flight.iter_mut() {
                        let elapsed = now.duration_since(f.started);
                        if !f.warned && elapsed >= self.slow_threshold(f.timeout_ms) {
                            f.warned = true;
                            report.results.push(Self::slow_warning(step_id, provider, elapsed, f.timeout_ms));
                        }
                    }
                }
            }
        }

        if !report.results.is_empty() {
            tracing::info!(
                warnings = report.results.len(),
                checkpoint = report.checkpoint_requested,
                "in-flight gate"
            );
        }
        report
    }
}
