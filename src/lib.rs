//! Waggle - 自适应任务路由与执行编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量），含默认规则表与决策矩阵
//! - **core**: 请求模型、错误与恢复、调用监管、并发限制、运行时表与编排器
//! - **detector**: 触发规则、模式表、信号打分与冲突解析
//! - **resource**: 资源分区（Green/Yellow/Orange/Red）与执行策略
//! - **routing**: 任务分类、决策矩阵、provider 可用性与执行计划
//! - **execution**: provider 注册表与执行协调器
//! - **gates**: 执行前 / 执行中 / 执行后质量门禁
//! - **memory**: 分层键值存储、检查点、结果日志与路由偏置
//! - **protocol**: 生命周期事件的请求 / 响应记录

pub mod config;
pub mod core;
pub mod detector;
pub mod execution;
pub mod gates;
pub mod memory;
pub mod observability;
pub mod protocol;
pub mod resource;
pub mod routing;

pub use crate::core::Orchestrator;
pub use protocol::{EventType, InvocationRequest, InvocationResponse, Status};
