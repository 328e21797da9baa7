//! 学习记账：步骤结果追加到 JSONL 日志，离线聚合成路由偏置
//!
//! 调用过程中只追加，不修改路由表；`waggle aggregate` 读取日志生成 routing_bias.json，
//! 下次加载配置时按成功率重排各行的回退链。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::StoreError;
use crate::routing::MatrixRow;

/// 一个步骤的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub request_id: String,
    pub task_type: String,
    pub domain: String,
    pub step: String,
    pub provider: String,
    /// completed / failed / timed_out / skipped / reported
    pub status: String,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl OutcomeEvent {
    pub fn succeeded(&self) -> bool {
        self.status == "completed" || self.status == "success"
    }
}

/// 追加写入的结果日志（`<data_dir>/outcomes.jsonl`）
#[derive(Debug, Clone)]
pub struct OutcomeLog {
    path: PathBuf,
}

impl OutcomeLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("outcomes.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &OutcomeEvent) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(event)).await
    }

    pub async fn append_all(&self, events: &[OutcomeEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(p) = self.path.parent() {
            fs::create_dir_all(p).await?;
        }
        let mut buf = String::new();
        for e in events {
            buf.push_str(&serde_json::to_string(e)?);
            buf.push('\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        Ok(())
    }
}

/// 单个 provider 的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTally {
    pub attempts: u64,
    pub successes: u64,
}

impl ProviderTally {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// 聚合统计（按 provider 名排序）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub providers: BTreeMap<String, ProviderTally>,
    /// 无法解析而跳过的行数
    pub skipped_lines: u64,
}

/// 读取日志并统计；日志不存在时返回空统计
pub async fn aggregate(path: &Path) -> Result<ProviderStats, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProviderStats::default()),
        Err(e) => return Err(e.into()),
    };
    let mut stats = ProviderStats::default();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<OutcomeEvent>(line) {
            Ok(event) => {
                // 被跳过的步骤不计入
                if event.status == "skipped" {
                    continue;
                }
                let tally = stats.providers.entry(event.provider.clone()).or_default();
                tally.attempts += 1;
                if event.succeeded() {
                    tally.successes += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed outcome line");
                stats.skipped_lines += 1;
            }
        }
    }
    Ok(stats)
}

/// 路由偏置：各 provider 的观测成功率
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingBias {
    pub success_rate: BTreeMap<String, f64>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl RoutingBias {
    /// 样本数不足 `min_samples` 的 provider 不参与偏置
    pub fn from_stats(stats: &ProviderStats, min_samples: u64) -> Self {
        let success_rate = stats
            .providers
            .iter()
            .filter(|(_, t)| t.attempts >= min_samples.max(1))
            .map(|(name, t)| (name.clone(), t.success_rate()))
            .collect();
        Self {
            success_rate,
            generated_at: Some(Utc::now()),
        }
    }

    /// 按成功率降序重排回退链（稳定排序；无数据者视为 0.5）；主 provider 不变
    pub fn apply(&self, row: &MatrixRow) -> MatrixRow {
        let mut out = row.clone();
        if self.success_rate.is_empty() {
            return out;
        }
        let rate = |name: &String| self.success_rate.get(name).copied().unwrap_or(0.5);
        out.fallback_chain
            .sort_by(|a, b| rate(b).total_cmp(&rate(a)));
        out
    }

    pub async fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(p) = path.parent() {
            fs::create_dir_all(p).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{DomainTag, TaskType};
    use tempfile::TempDir;

    fn event(provider: &str, status: &str) -> OutcomeEvent {
        OutcomeEvent {
            timestamp: Utc::now(),
            session_id: "s".into(),
            request_id: "r".into(),
            task_type: "analysis".into(),
            domain: "any".into(),
            step: "execute".into(),
            provider: provider.into(),
            status: status.into(),
            fallback_used: false,
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_append_then_aggregate() {
        let dir = TempDir::new().unwrap();
        let log = OutcomeLog::new(dir.path());
        log.append_all(&[
            event("a", "completed"),
            event("a", "failed"),
            event("b", "completed"),
            event("b", "skipped"),
        ])
        .await
        .unwrap();
        log.append(&event("a", "completed")).await.unwrap();

        let stats = aggregate(log.path()).await.unwrap();
        assert_eq!(stats.providers["a"], ProviderTally { attempts: 3, successes: 2 });
        assert_eq!(stats.providers["b"], ProviderTally { attempts: 1, successes: 1 });
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let stats = aggregate(&dir.path().join("nope.jsonl")).await.unwrap();
        assert!(stats.providers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let good = serde_json::to_string(&event("a", "completed")).unwrap();
        tokio::fs::write(&path, format!("{good}\nnot json\n")).await.unwrap();
        let stats = aggregate(&path).await.unwrap();
        assert_eq!(stats.skipped_lines, 1);
        assert_eq!(stats.providers["a"].attempts, 1);
    }

    #[tokio::test]
    async fn test_bias_reorders_fallbacks_only() {
        let mut stats = ProviderStats::default();
        stats.providers.insert("x".into(), ProviderTally { attempts: 10, successes: 2 });
        stats.providers.insert("y".into(), ProviderTally { attempts: 10, successes: 9 });
        stats.providers.insert("z".into(), ProviderTally { attempts: 1, successes: 1 });
        let bias = RoutingBias::from_stats(&stats, 5);
        assert!(!bias.success_rate.contains_key("z"));

        let row = MatrixRow::new(TaskType::Analysis, DomainTag::Any, "p", &["x", "z", "y"]);
        let biased = bias.apply(&row);
        assert_eq!(biased.primary, "p");
        assert_eq!(biased.fallback_chain, vec!["y", "z", "x"]);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routing_bias.json");
        bias.save(&path).await.unwrap();
        assert_eq!(RoutingBias::load(&path).await.unwrap(), Some(bias));
    }
}
