//! Agent 错误类型
//!
//! 取消不是错误（走 Aborted 终态）；工具失败与权限拒绝在本地恢复为失败结果写回 transcript。
//! 这里只收集会让整轮查询失败的情况：不变式被破坏、模型调用最终失败、checkpoint / 环境错误等。

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::core::state::InvalidTransition;
use crate::env::EnvError;
use crate::llm::ModelError;
use crate::transcript::TranscriptError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transcript invariant violated: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("environment error: {0}")]
    Environment(#[from] EnvError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("iteration limit of {0} reached without a final answer")]
    IterationLimit(usize),

    #[error("Config error: {0}")]
    Config(String),
}
