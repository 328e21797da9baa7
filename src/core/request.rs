//! 单次调用内的只读输入：Request 与 ContextSnapshot
//!
//! 两者在调用开始时构造，之后只读共享，不加锁。

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一个工作单元（构造后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub text: String,
    pub operation_type: String,
    pub declared_flags: Vec<String>,
    pub file_scope: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4()),
            text: text.into(),
            operation_type: String::new(),
            declared_flags: Vec::new(),
            file_scope: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation_type = op.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.declared_flags = flags;
        self
    }

    /// 去掉指定 flag 后的副本（同一请求 ID）
    pub fn without_flags(&self, drop: &[&str]) -> Self {
        let drop: Vec<String> = drop.iter().map(|f| crate::detector::normalize_flag(f)).collect();
        let mut copy = self.clone();
        copy.declared_flags
            .retain(|f| !drop.contains(&crate::detector::normalize_flag(f)));
        copy
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.file_scope = files;
        self
    }

    pub fn file_count(&self) -> usize {
        self.file_scope.len()
    }

    /// 文件范围中最深的目录层级
    pub fn directory_depth(&self) -> usize {
        self.file_scope
            .iter()
            .map(|f| {
                Path::new(f)
                    .parent()
                    .map(|p| p.components().count())
                    .unwrap_or(0)
            })
            .max()
            .unwrap_or(0)
    }

    /// 文件范围覆盖的不同顶层目录数
    pub fn top_level_dirs(&self) -> usize {
        self.file_scope
            .iter()
            .filter_map(|f| {
                let p = Path::new(f);
                if p.components().count() > 1 {
                    p.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// 小写扩展名列表（与 file_scope 同序）
    pub fn extensions(&self) -> Vec<String> {
        self.file_scope
            .iter()
            .map(|f| {
                let p = Path::new(f);
                match p.extension() {
                    Some(ext) => ext.to_string_lossy().to_lowercase(),
                    // Dockerfile、Makefile 这类无扩展名文件按文件名匹配
                    None => p
                        .file_name()
                        .map(|n| n.to_string_lossy().to_lowercase())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// 路由前刷新的资源/上下文快照（不回写）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub resource_usage_percent: f64,
    pub context_usage_percent: f64,
    pub active_session_id: String,
    pub recent_operations: Vec<String>,
    pub elapsed_session_minutes: f64,
}

impl ContextSnapshot {
    /// 分区判定使用的压力值：资源与上下文占用取大者
    pub fn pressure(&self) -> f64 {
        self.resource_usage_percent
            .max(self.context_usage_percent)
            .clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_features() {
        let req = Request::new("x").with_files(vec![
            "src/ui/button.tsx".into(),
            "server/api/routes.rs".into(),
            "Dockerfile".into(),
        ]);
        assert_eq!(req.file_count(), 3);
        assert_eq!(req.directory_depth(), 2);
        assert_eq!(req.top_level_dirs(), 2);
        assert_eq!(req.extensions(), vec!["tsx", "rs", "dockerfile"]);
    }

    #[test]
    fn test_pressure_uses_max() {
        let ctx = ContextSnapshot {
            resource_usage_percent: 40.0,
            context_usage_percent: 82.0,
            ..Default::default()
        };
        assert_eq!(ctx.pressure(), 82.0);
    }
}
