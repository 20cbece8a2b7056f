//! 模型客户端抽象
//!
//! 每一轮把完整 transcript 与可用工具清单交给模型，模型给出下一步：最终回复或一次工具调用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolSpec;
use crate::transcript::Message;

/// 一次模型调用的输入
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    /// 上一次工具失败的信息（成功后清空），供模型在提示中单独强调
    pub last_tool_error: Option<&'a str>,
}

/// 模型发起的工具调用；`id` 由模型生成，用作 tool_use / tool_result 的关联 id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 模型的下一步决策
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDecision {
    FinalAnswer(String),
    ToolCall(ToolCall),
}

/// 模型调用错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// 限流、网络错误与 5xx 可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } | ModelError::Network(_) => true,
            ModelError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            ModelError::InvalidResponse(_) => false,
        }
    }
}

/// 模型客户端
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn next_action(&self, request: &ModelRequest<'_>) -> Result<ModelDecision, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ModelError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(ModelError::Network("reset".into()).is_retryable());
        assert!(ModelError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!ModelError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!ModelError::InvalidResponse("garbage".into()).is_retryable());
    }
}
