//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAGGLE__*` 覆盖（双下划线表示嵌套，如 `WAGGLE__APP__DATA_DIR=/tmp/w`）。
//! 触发规则、模式表、provider 目录与决策矩阵都是数据：未在文件中给出时使用这里的默认表。

use std::path::PathBuf;

use serde::Deserialize;

use crate::detector::{BehaviorFlags, FlagBinding, Mode, ModeProfile, Orientation, TriggerRule};
use crate::gates::GateConfig;
use crate::memory::{CheckpointTriggerConfig, RetentionPolicy};
use crate::protocol::EventType;
use crate::resource::ResourceThresholds;
use crate::routing::{DomainSignals, DomainTag, MatrixRow, ProviderSpec, TaskKeywords, TaskType};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub resources: ResourceThresholds,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub checkpoint: CheckpointTriggerConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSpec>,
    #[serde(default = "default_matrix")]
    pub matrix: Vec<MatrixRow>,
    #[serde(default = "default_rules")]
    pub rules: Vec<TriggerRule>,
    #[serde(default = "default_modes")]
    pub modes: Vec<ModeProfile>,
    #[serde(default = "default_flags")]
    pub flags: Vec<FlagBinding>,
    #[serde(default = "default_exclusive_flags")]
    pub exclusive_flags: Vec<Vec<String>>,
    #[serde(default = "default_task_keywords")]
    pub task_keywords: Vec<TaskKeywords>,
    #[serde(default = "default_domains")]
    pub domains: Vec<DomainSignals>,
}

/// [app] 段：数据目录、兜底 provider、检测参数
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 会话数据库、结果日志与路由偏置文件所在目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_universal_provider")]
    pub universal_provider: String,
    /// 少于该字符数的请求不做自动检测
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// 任务分类中每个关键词命中贡献的置信度
    #[serde(default = "default_keyword_hit_weight")]
    pub keyword_hit_weight: f64,
    /// 启动时对 provider 做健康检查
    #[serde(default = "default_health_check")]
    pub health_check: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".waggle")
}

fn default_universal_provider() -> String {
    "native".to_string()
}

fn default_min_text_chars() -> usize {
    8
}

fn default_keyword_hit_weight() -> f64 {
    0.35
}

fn default_health_check() -> bool {
    true
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            universal_provider: default_universal_provider(),
            min_text_chars: default_min_text_chars(),
            keyword_hit_weight: default_keyword_hit_weight(),
            health_check: default_health_check(),
        }
    }
}

/// [timeouts] 段：各事件类型的调用预算（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_session_start_ms")]
    pub session_start: u64,
    #[serde(default = "default_pre_operation_ms")]
    pub pre_operation: u64,
    #[serde(default = "default_post_operation_ms")]
    pub post_operation: u64,
    #[serde(default = "default_pre_compaction_ms")]
    pub pre_compaction: u64,
    #[serde(default = "default_notification_ms")]
    pub notification: u64,
    #[serde(default = "default_session_stop_ms")]
    pub session_stop: u64,
    #[serde(default = "default_subtask_stop_ms")]
    pub subtask_stop: u64,
}

fn default_session_start_ms() -> u64 {
    10_000
}

fn default_pre_operation_ms() -> u64 {
    15_000
}

fn default_post_operation_ms() -> u64 {
    5_000
}

fn default_pre_compaction_ms() -> u64 {
    10_000
}

fn default_notification_ms() -> u64 {
    3_000
}

fn default_session_stop_ms() -> u64 {
    10_000
}

fn default_subtask_stop_ms() -> u64 {
    5_000
}

impl TimeoutsSection {
    pub fn budget_ms(&self, event: EventType) -> u64 {
        match event {
            EventType::SessionStart => self.session_start,
            EventType::PreOperation => self.pre_operation,
            EventType::PostOperation => self.post_operation,
            EventType::PreCompaction => self.pre_compaction,
            EventType::Notification => self.notification,
            EventType::SessionStop => self.session_stop,
            EventType::SubtaskStop => self.subtask_stop,
        }
    }
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            session_start: default_session_start_ms(),
            pre_operation: default_pre_operation_ms(),
            post_operation: default_post_operation_ms(),
            pre_compaction: default_pre_compaction_ms(),
            notification: default_notification_ms(),
            session_stop: default_session_stop_ms(),
            subtask_stop: default_subtask_stop_ms(),
        }
    }
}

/// [routing] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    /// 矩阵行未指定 timeout_ms 时的步骤超时
    #[serde(default = "default_step_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_split_min_domains")]
    pub split_min_domains: usize,
    #[serde(default = "default_universal_provider")]
    pub validation_provider: String,
    #[serde(default = "default_break_on_error")]
    pub break_on_error: bool,
    /// 路由偏置中 provider 的最少样本数
    #[serde(default = "default_bias_min_samples")]
    pub bias_min_samples: u64,
    #[serde(default = "default_use_bias")]
    pub use_bias: bool,
}

fn default_step_timeout_ms() -> u64 {
    5_000
}

fn default_split_min_domains() -> usize {
    2
}

fn default_break_on_error() -> bool {
    true
}

fn default_bias_min_samples() -> u64 {
    5
}

fn default_use_bias() -> bool {
    true
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_step_timeout_ms(),
            split_min_domains: default_split_min_domains(),
            validation_provider: default_universal_provider(),
            break_on_error: default_break_on_error(),
            bias_min_samples: default_bias_min_samples(),
            use_bias: default_use_bias(),
        }
    }
}

// ------------------------------------------------------------ 默认表

fn default_providers() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec::new("deep-reasoning", "multi-step reasoning and architectural analysis"),
        ProviderSpec::new("symbol-index", "semantic code navigation and symbol-level edits").lightweight(),
        ProviderSpec::new("docs-lookup", "official library documentation lookup").lightweight(),
        ProviderSpec::new("bulk-edit", "pattern-based edits across many files")
            .lightweight()
            .optimization(),
        ProviderSpec::new("ui-builder", "UI component generation"),
        ProviderSpec::new("test-runner", "test execution and browser checks").lightweight(),
        ProviderSpec::new("security-audit", "security review of changed code"),
        ProviderSpec::new("native", "built-in manual/native handling").lightweight(),
    ]
}

fn default_matrix() -> Vec<MatrixRow> {
    vec![
        MatrixRow::new(TaskType::General, DomainTag::Any, "deep-reasoning", &["symbol-index"]),
        MatrixRow::new(TaskType::Discovery, DomainTag::Any, "deep-reasoning", &["docs-lookup"]),
        MatrixRow::new(TaskType::Analysis, DomainTag::Any, "deep-reasoning", &["symbol-index"])
            .min_confidence(0.4),
        MatrixRow::new(
            TaskType::Analysis,
            DomainTag::Security,
            "security-audit",
            &["deep-reasoning", "symbol-index"],
        )
        .min_confidence(0.4),
        MatrixRow::new(
            TaskType::Implementation,
            DomainTag::Frontend,
            "ui-builder",
            &["symbol-index", "deep-reasoning"],
        )
        .parallel(3),
        MatrixRow::new(
            TaskType::Implementation,
            DomainTag::Backend,
            "symbol-index",
            &["deep-reasoning"],
        )
        .parallel(3),
        MatrixRow::new(
            TaskType::Implementation,
            DomainTag::Any,
            "symbol-index",
            &["deep-reasoning"],
        )
        .parallel(2),
        MatrixRow::new(
            TaskType::Refactor,
            DomainTag::Any,
            "bulk-edit",
            &["symbol-index", "deep-reasoning"],
        )
        .parallel(4)
        .min_confidence(0.3),
        MatrixRow::new(TaskType::Testing, DomainTag::Any, "test-runner", &["symbol-index"]).parallel(3),
        MatrixRow::new(TaskType::Documentation, DomainTag::Any, "docs-lookup", &["deep-reasoning"]),
        MatrixRow::new(TaskType::Coordination, DomainTag::Any, "deep-reasoning", &["symbol-index"])
            .parallel(2),
    ]
}

fn default_rules() -> Vec<TriggerRule> {
    vec![
        // discovery
        TriggerRule::lexical("lex.discovery.brainstorm", r"\b(brainstorm\w*|ideate)\b", 0.3, Mode::Discovery),
        TriggerRule::lexical("lex.discovery.uncertain", r"\b(maybe|perhaps|not sure|thinking about)\b", 0.3, Mode::Discovery),
        TriggerRule::lexical("lex.discovery.explore", r"\b(explore|figure out|investigate options)\b", 0.3, Mode::Discovery),
        TriggerRule::lexical("lex.discovery.wish", r"\b(i want to|could we|what if)\b", 0.3, Mode::Discovery),
        // task coordination
        TriggerRule::semantic("sem.coordination.files", "file_count > 3", 0.4, Mode::TaskCoordination),
        TriggerRule::semantic("sem.coordination.dirs", "top_level_dirs > 2", 0.3, Mode::TaskCoordination),
        TriggerRule::lexical("lex.coordination.steps", r"\b(multi-step|step by step|phases?|roadmap|and then)\b", 0.3, Mode::TaskCoordination),
        // tool optimization
        TriggerRule::lexical("lex.tools.batch", r"\b(batch|bulk|all files|every file|across the codebase)\b", 0.4, Mode::ToolOptimization),
        TriggerRule::semantic("sem.tools.extensions", "extension_count > 3", 0.3, Mode::ToolOptimization),
        TriggerRule::semantic("sem.tools.files", "file_count > 10", 0.3, Mode::ToolOptimization),
        // compressed communication
        TriggerRule::context("ctx.compress.context", "context_usage > 75", 0.6, Mode::CompressedCommunication),
        TriggerRule::context("ctx.compress.resource", "resource_usage > 75", 0.6, Mode::CompressedCommunication),
        TriggerRule::lexical("lex.compress.brief", r"\b(brief|concise|tl;?dr|short answer)\b", 0.6, Mode::CompressedCommunication),
        // self analysis
        TriggerRule::lexical("lex.self.retro", r"\b(what went wrong|why did|reflect|retrospective)\b", 0.6, Mode::SelfAnalysis),
        TriggerRule::context("ctx.self.churn", "recent_operations > 20", 0.2, Mode::SelfAnalysis),
        // safe validation
        TriggerRule::lexical("lex.safe.production", r"\b(production|prod|critical|irreversible)\b", 0.4, Mode::SafeValidation),
        TriggerRule::lexical("lex.safe.destructive", r"\b(delete|drop|wipe|remove all|force push)\b", 0.3, Mode::SafeValidation),
        TriggerRule::context("ctx.safe.resource", "resource_usage > 85", 0.3, Mode::SafeValidation),
        TriggerRule::semantic("sem.safe.scope", "file_count > 20", 0.3, Mode::SafeValidation),
    ]
}

fn default_modes() -> Vec<ModeProfile> {
    vec![
        ModeProfile::new(Mode::SafeValidation, "execution", Orientation::Safety).with_behavior(BehaviorFlags {
            validate_after: true,
            ..Default::default()
        }),
        ModeProfile::new(Mode::Discovery, "behavior", Orientation::Neutral)
            .with_task_hint(TaskType::Discovery)
            .with_behavior(BehaviorFlags {
                clarify_first: true,
                ..Default::default()
            }),
        ModeProfile::new(Mode::TaskCoordination, "behavior", Orientation::Neutral)
            .with_task_hint(TaskType::Coordination)
            .with_behavior(BehaviorFlags {
                prefer_parallel: true,
                ..Default::default()
            }),
        ModeProfile::new(Mode::ToolOptimization, "execution", Orientation::Optimization).with_behavior(
            BehaviorFlags {
                prefer_parallel: true,
                ..Default::default()
            },
        ),
        ModeProfile::new(Mode::CompressedCommunication, "output", Orientation::Optimization).with_behavior(
            BehaviorFlags {
                compress_output: true,
                ..Default::default()
            },
        ),
        ModeProfile::new(Mode::SelfAnalysis, "behavior", Orientation::Neutral).with_task_hint(TaskType::Analysis),
    ]
}

fn default_flags() -> Vec<FlagBinding> {
    [
        ("--brainstorm", Mode::Discovery),
        ("--task-manage", Mode::TaskCoordination),
        ("--orchestrate", Mode::ToolOptimization),
        ("--uc", Mode::CompressedCommunication),
        ("--introspect", Mode::SelfAnalysis),
        ("--safe-mode", Mode::SafeValidation),
        ("--validate", Mode::SafeValidation),
    ]
    .into_iter()
    .map(|(flag, mode)| FlagBinding {
        flag: flag.to_string(),
        mode,
    })
    .collect()
}

fn default_exclusive_flags() -> Vec<Vec<String>> {
    vec![
        vec!["--uc".into(), "--verbose".into()],
        vec!["--safe-mode".into(), "--fast".into()],
    ]
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_task_keywords() -> Vec<TaskKeywords> {
    vec![
        TaskKeywords {
            task_type: TaskType::Discovery,
            keywords: words(&["brainstorm", "explore", "idea", "ideas", "requirements", "maybe"]),
        },
        TaskKeywords {
            task_type: TaskType::Analysis,
            keywords: words(&["analyze", "analyse", "investigate", "review", "audit", "debug", "diagnose", "why"]),
        },
        TaskKeywords {
            task_type: TaskType::Implementation,
            keywords: words(&["implement", "add", "build", "create", "write", "feature"]),
        },
        TaskKeywords {
            task_type: TaskType::Refactor,
            keywords: words(&["refactor", "rename", "cleanup", "restructure", "simplify", "extract"]),
        },
        TaskKeywords {
            task_type: TaskType::Testing,
            keywords: words(&["test", "tests", "coverage", "flaky", "e2e"]),
        },
        TaskKeywords {
            task_type: TaskType::Documentation,
            keywords: words(&["document", "docs", "readme", "explain", "comment"]),
        },
        TaskKeywords {
            task_type: TaskType::Coordination,
            keywords: words(&["plan", "coordinate", "orchestrate", "roadmap", "phases"]),
        },
    ]
}

fn default_domains() -> Vec<DomainSignals> {
    vec![
        DomainSignals {
            domain: DomainTag::Frontend,
            extensions: words(&["tsx", "jsx", "vue", "svelte", "css", "scss", "html"]),
            keywords: words(&["ui", "component", "frontend", "css", "react", "layout"]),
        },
        DomainSignals {
            domain: DomainTag::Backend,
            extensions: words(&["rs", "go", "py", "java", "rb", "kt", "ts", "js"]),
            keywords: words(&["api", "server", "endpoint", "backend", "handler"]),
        },
        DomainSignals {
            domain: DomainTag::Security,
            extensions: words(&["pem", "key", "crt"]),
            keywords: words(&["security", "vulnerability", "auth", "xss", "csrf", "injection"]),
        },
        DomainSignals {
            domain: DomainTag::Infrastructure,
            extensions: words(&["tf", "yaml", "yml", "dockerfile", "nix"]),
            keywords: words(&["deploy", "docker", "kubernetes", "ci", "pipeline", "terraform"]),
        },
        DomainSignals {
            domain: DomainTag::Data,
            extensions: words(&["sql", "csv", "parquet", "ipynb"]),
            keywords: words(&["sql", "migration", "schema", "etl", "query"]),
        },
        DomainSignals {
            domain: DomainTag::Docs,
            extensions: words(&["md", "rst", "adoc", "txt"]),
            keywords: words(&["readme", "changelog", "docs"]),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            timeouts: TimeoutsSection::default(),
            resources: ResourceThresholds::default(),
            routing: RoutingSection::default(),
            checkpoint: CheckpointTriggerConfig::default(),
            retention: RetentionPolicy::default(),
            gates: GateConfig::default(),
            providers: default_providers(),
            matrix: default_matrix(),
            rules: default_rules(),
            modes: default_modes(),
            flags: default_flags(),
            exclusive_flags: default_exclusive_flags(),
            task_keywords: default_task_keywords(),
            domains: default_domains(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WAGGLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAGGLE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAGGLE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 只从给定 TOML 文本解析（测试与热更新校验用）
pub fn parse_toml(text: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(text)
}
