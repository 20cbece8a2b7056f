//! Checkpoint：变更前快照与任意历史快照的恢复
//!
//! - **CheckpointStore**：init / snapshot / restore 三个操作，快照按会话独立存放在侧存储区
//! - **GitCheckpointStore**：每会话一个 bare 仓库，全部通过执行环境的 execute_command 驱动
//! - **MemoryCheckpointStore**：进程内实现，经由 glob / read / write 抓取与回写文件
//! - **CheckpointingEnvironment**：装饰任意后端，拦截写文件 / 编辑文件 / 执行命令，先快照再委托

pub mod facade;
pub mod git;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::{EnvError, Environment};

pub use facade::{CheckpointingEnvironment, InvocationEnvironment};
pub use git::GitCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// 快照存储错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint history for session '{0}' is not initialized")]
    NotInitialized(String),

    #[error("checkpoint '{id}' not found for session '{session_id}'")]
    NotFound { session_id: String, id: String },

    #[error("session '{0}' has no checkpoints yet")]
    Empty(String),

    #[error("checkpoint step '{step}' failed: {detail}")]
    Command { step: &'static str, detail: String },

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error(transparent)]
    Environment(#[from] EnvError),
}

/// 快照元数据
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub session_id: String,
    /// 触发本次快照的工具调用 id
    pub tool_use_id: Option<String>,
    /// 快照时刻执行环境自身的 VCS commit
    pub host_commit: Option<String>,
    /// 可读原因，即触发的操作名（write_file / edit_file / execute_command）
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointMeta {
    pub fn new(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tool_use_id: None,
            host_commit: None,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 快照结果：内容寻址的 id 与可传输的 bundle（对内核不透明）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub bundle: Vec<u8>,
}

/// 快照存储。调用方自行串行化 snapshot（Driver 每会话同时只有一个工具调用在执行）。
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 幂等地准备会话的快照历史，重复调用不报错也不重复创建
    async fn init(&self, root: &str, session_id: &str, env: &dyn Environment) -> Result<(), CheckpointError>;

    async fn snapshot(
        &self,
        meta: &CheckpointMeta,
        env: &dyn Environment,
        root: &str,
    ) -> Result<Snapshot, CheckpointError>;

    /// 将环境恢复到指定快照（None 表示最近一次），返回恢复到的快照 commit id
    async fn restore(
        &self,
        session_id: &str,
        env: &dyn Environment,
        root: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<String, CheckpointError>;
}

/// 会话 id 用作目录名前的清洗
pub(crate) fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// shell 单参数转义
pub(crate) fn shell_quote(raw: &str) -> Result<String, CheckpointError> {
    shlex::try_quote(raw)
        .map(|q| q.into_owned())
        .map_err(|e| CheckpointError::Command {
            step: "quote",
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize_session_id("../evil id"), "___evil_id");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain").unwrap(), "plain");
        let quoted = shell_quote("it's a\nmessage").unwrap();
        assert_eq!(shlex::split(&quoted), Some(vec!["it's a\nmessage".to_string()]));
        assert!(shell_quote("nul\0byte").is_err());
    }
}
