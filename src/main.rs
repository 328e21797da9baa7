//! Waggle 宿主钩子入口
//!
//! `waggle [--config <path>]`：从 stdin 读一条事件请求，向 stdout 写一条响应；blocked 时退出码为 2。
//! `waggle aggregate [--min-samples <n>]`：离线聚合结果日志，生成路由偏置文件。

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use waggle::config::{load_config, AppConfig};
use waggle::core::orchestrator::ROUTING_BIAS_FILE;
use waggle::memory::{aggregate, OutcomeLog, RoutingBias};
use waggle::{InvocationRequest, Orchestrator};

struct Args {
    command: Option<String>,
    config: Option<PathBuf>,
    min_samples: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        command: None,
        config: None,
        min_samples: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().context("--config needs a path")?.into()),
            "--min-samples" => {
                let n = it.next().context("--min-samples needs a number")?;
                args.min_samples = Some(n.parse().context("--min-samples needs a number")?);
            }
            other if args.command.is_none() && !other.starts_with('-') => {
                args.command = Some(other.to_string())
            }
            other => anyhow::bail!("unexpected argument: {}", other),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    waggle::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    match args.command.as_deref() {
        None | Some("hook") => {
            let code = run_hook(&cfg).await?;
            std::process::exit(code);
        }
        Some("aggregate") => run_aggregate(&cfg, args.min_samples).await,
        Some(other) => anyhow::bail!("unknown command: {}", other),
    }
}

async fn run_hook(cfg: &AppConfig) -> anyhow::Result<i32> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read request from stdin")?;
    let request = InvocationRequest::from_json(&input).context("Invalid invocation request")?;

    let orchestrator = Orchestrator::from_config(cfg)
        .await
        .context("Failed to build runtime tables")?;
    let response = orchestrator.handle(request).await;

    let mut out = response.to_json().context("Failed to encode response")?;
    out.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(out.as_bytes()).await?;
    stdout.flush().await?;
    Ok(response.status.exit_code())
}

async fn run_aggregate(cfg: &AppConfig, min_samples: Option<u64>) -> anyhow::Result<()> {
    let log = OutcomeLog::new(&cfg.app.data_dir);
    let stats = aggregate(log.path())
        .await
        .with_context(|| format!("Failed to read {}", log.path().display()))?;
    let bias = RoutingBias::from_stats(&stats, min_samples.unwrap_or(cfg.routing.bias_min_samples));
    let path = cfg.app.data_dir.join(ROUTING_BIAS_FILE);
    bias.save(&path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(
        providers = bias.success_rate.len(),
        skipped_lines = stats.skipped_lines,
        path = %path.display(),
        "routing bias written"
    );
    Ok(())
}
