//! 任务分类：由首位激活模式 + 关键词 / 扩展名启发式推断 (任务类型, 领域, 置信度)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Request;
use crate::detector::ActivationScore;
use crate::routing::{DomainTag, TaskType};

/// 任务类型关键词表的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskKeywords {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
}

/// 领域信号表的一行：扩展名 + 关键词
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSignals {
    pub domain: DomainTag,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub task_type: TaskType,
    /// 主领域；没有任何领域信号时为 `Any`
    pub domain: DomainTag,
    /// 由文件扩展名识别出的领域及其文件（按领域表顺序）
    pub file_domains: Vec<(DomainTag, Vec<String>)>,
    pub confidence: f64,
}

/// 基于关键词的任务分类器（不调用任何外部能力，结果确定）
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    tasks: Vec<TaskKeywords>,
    domains: Vec<DomainSignals>,
    keyword_hit_weight: f64,
}

impl TaskClassifier {
    pub fn new(tasks: Vec<TaskKeywords>, domains: Vec<DomainSignals>, keyword_hit_weight: f64) -> Self {
        Self {
            tasks,
            domains,
            keyword_hit_weight,
        }
    }

    pub fn classify(
        &self,
        request: &Request,
        top: Option<&ActivationScore>,
        top_hint: Option<TaskType>,
    ) -> Classification {
        let tokens = tokenize(&request.text);

        // 关键词投票：命中数最多者胜，平局取表中靠前者
        let mut best: Option<(TaskType, usize)> = None;
        for entry in &self.tasks {
            let hits = count_hits(&tokens, &entry.keywords);
            if hits > 0 && best.map(|(_, h)| hits > h).unwrap_or(true) {
                best = Some((entry.task_type, hits));
            }
        }
        let keyword_conf = best
            .map(|(_, hits)| (hits as f64 * self.keyword_hit_weight).min(1.0))
            .unwrap_or(0.0);

        let (task_type, confidence) = match (top, top_hint, best) {
            (Some(score), Some(hint), Some((kw_task, _))) if kw_task == hint => {
                (hint, score.score.max(keyword_conf))
            }
            (Some(score), Some(hint), _) if score.score >= keyword_conf => (hint, score.score),
            (_, _, Some((kw_task, _))) => (kw_task, keyword_conf),
            _ => (TaskType::General, top.map(|s| s.score).unwrap_or(0.0)),
        };

        let (domain, file_domains) = self.domains_of(request, &tokens);

        Classification {
            task_type,
            domain,
            file_domains,
            confidence,
        }
    }

    fn domains_of(&self, request: &Request, tokens: &[String]) -> (DomainTag, Vec<(DomainTag, Vec<String>)>) {
        // 领域表下标 → (命中数, 文件)
        let mut hits: BTreeMap<usize, (usize, Vec<String>)> = BTreeMap::new();

        for (file, ext) in request.file_scope.iter().zip(request.extensions()) {
            if let Some(i) = self
                .domains
                .iter()
                .position(|d| d.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            {
                let entry = hits.entry(i).or_insert((0, Vec::new()));
                entry.0 += 1;
                entry.1.push(file.clone());
            }
        }
        for (i, d) in self.domains.iter().enumerate() {
            let n = count_hits(tokens, &d.keywords);
            if n > 0 {
                hits.entry(i).or_insert((0, Vec::new())).0 += n;
            }
        }

        let mut primary: Option<(usize, usize)> = None;
        for (i, (n, _)) in &hits {
            if primary.map(|(_, best)| *n > best).unwrap_or(true) {
                primary = Some((*i, *n));
            }
        }
        let domain = primary
            .map(|(i, _)| self.domains[i].domain)
            .unwrap_or(DomainTag::Any);

        let file_domains = hits
            .into_iter()
            .filter(|(_, (_, files))| !files.is_empty())
            .map(|(i, (_, files))| (self.domains[i].domain, files))
            .collect();

        (domain, file_domains)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// 前缀匹配：`test` 命中 `tests` / `testing`
fn count_hits(tokens: &[String], keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|k| {
            let k = k.to_lowercase();
            tokens.iter().any(|t| t.starts_with(&k))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Mode;

    fn classifier() -> TaskClassifier {
        TaskClassifier::new(
            vec![
                TaskKeywords {
                    task_type: TaskType::Analysis,
                    keywords: vec!["analyz".into(), "investigat".into(), "audit".into()],
                },
                TaskKeywords {
                    task_type: TaskType::Testing,
                    keywords: vec!["test".into(), "coverage".into()],
                },
            ],
            vec![
                DomainSignals {
                    domain: DomainTag::Frontend,
                    extensions: vec!["tsx".into(), "css".into()],
                    keywords: vec!["component".into()],
                },
                DomainSignals {
                    domain: DomainTag::Backend,
                    extensions: vec!["rs".into()],
                    keywords: vec!["endpoint".into()],
                },
            ],
            0.35,
        )
    }

    fn score(mode: Mode, value: f64) -> ActivationScore {
        ActivationScore {
            mode,
            score: value,
            contributing_rules: vec![],
            declared: false,
            activated: true,
            declaration_order: 0,
        }
    }

    #[test]
    fn test_keyword_classification() {
        let req = Request::new("Investigate and audit the session endpoint");
        let c = classifier().classify(&req, None, None);
        assert_eq!(c.task_type, TaskType::Analysis);
        assert!((c.confidence - 0.7).abs() < 1e-9);
        assert_eq!(c.domain, DomainTag::Backend);
    }

    #[test]
    fn test_activation_hint_wins_when_stronger() {
        let req = Request::new("test ideas for the onboarding flow");
        let top = score(Mode::Discovery, 0.8);
        let c = classifier().classify(&req, Some(&top), Some(TaskType::Discovery));
        assert_eq!(c.task_type, TaskType::Discovery);
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn test_file_domains_grouped() {
        let req = Request::new("add tests").with_files(vec![
            "web/Button.tsx".into(),
            "api/src/lib.rs".into(),
            "web/theme.css".into(),
            "README".into(),
        ]);
        let c = classifier().classify(&req, None, None);
        assert_eq!(c.task_type, TaskType::Testing);
        assert_eq!(c.domain, DomainTag::Frontend);
        assert_eq!(
            c.file_domains,
            vec![
                (DomainTag::Frontend, vec!["web/Button.tsx".to_string(), "web/theme.css".to_string()]),
                (DomainTag::Backend, vec!["api/src/lib.rs".to_string()]),
            ]
        );
    }

    #[test]
    fn test_no_signal_is_general() {
        let c = classifier().classify(&Request::new("hello there"), None, None);
        assert_eq!(c.task_type, TaskType::General);
        assert_eq!(c.domain, DomainTag::Any);
        assert_eq!(c.confidence, 0.0);
    }
}
