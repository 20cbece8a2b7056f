//! Waypoint - 可回滚的 Agent 编排内核
//!
//! 模块划分：
//! - **agent**: 运行时装配（模型、工具、权限、快照存储、事件总线）
//! - **checkpoint**: 快照存储（git / 内存）与带快照的执行环境装饰器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、主循环、会话上下文、回滚协调、事件
//! - **env**: 执行环境能力接口与本地后端
//! - **llm**: 模型客户端抽象、重试包装与 Mock
//! - **permission**: 工具调用的权限闸门
//! - **tools**: 工具注册表、执行器与内置工具
//! - **transcript**: 会话消息序列与配对不变式

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod env;
pub mod llm;
pub mod observability;
pub mod permission;
pub mod tools;
pub mod transcript;

pub use agent::{Agent, AgentBuilder};
