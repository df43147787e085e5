//! Hive - Rust 智能体运行时
//!
//! 模块划分：
//! - **agent**: Agent 定义与从配置构建
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **gateway**: 多轮会话、任务协议与 HTTP 服务
//! - **llm**: 模型客户端抽象（OpenAI 兼容 / 脚本化 Mock）与价格表
//! - **memory**: 对话消息模型
//! - **observability**: 日志初始化
//! - **react**: 有界工具调用循环、运行回调与结构化输出
//! - **rpc**: JSON-RPC 2.0 消息类型
//! - **tools**: 工具注册表、执行器与远程工具传输
//! - **trace**: 执行轨迹（span）与消息还原
//!
//! 已知限制：单次模型调用或工具调用没有超时，也不能中途取消；运行只受 max_turns 约束。

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod rpc;
pub mod tools;
pub mod trace;

pub use crate::agent::{create_agent, Agent, RunConfig};
pub use crate::core::{AgentError, RunError};
pub use crate::react::{RunOutcome, RunOutput};
pub use crate::trace::Trace;
