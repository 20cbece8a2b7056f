//! 交互确认：把权限请求以消息形式交给宿主
//!
//! ChannelPrompt 通过 mpsc 发出 PermissionRequest，宿主用 oneshot 回复；回复端被丢弃视为拒绝。

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::permission::PermissionError;

#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn ask(&self, tool_id: &str, args: &Value) -> Result<bool, PermissionError>;
}

/// 发往宿主的权限请求
#[derive(Debug)]
pub struct PermissionRequest {
    pub tool: String,
    pub args: Value,
    pub reply: oneshot::Sender<bool>,
}

impl PermissionRequest {
    pub fn grant(self) {
        let _ = self.reply.send(true);
    }

    pub fn deny(self) {
        let _ = self.reply.send(false);
    }
}

/// 基于通道的交互确认
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    tx: mpsc::Sender<PermissionRequest>,
}

impl ChannelPrompt {
    /// 返回 prompt 与宿主侧接收端
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PermissionRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PermissionPrompt for ChannelPrompt {
    async fn ask(&self, tool_id: &str, args: &Value) -> Result<bool, PermissionError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PermissionRequest {
                tool: tool_id.to_string(),
                args: args.clone(),
                reply,
            })
            .await
            .map_err(|_| PermissionError::PromptClosed)?;
        answer.await.map_err(|_| PermissionError::NoAnswer)
    }
}

/// 固定回答（测试与非交互场景）
#[derive(Debug, Clone, Copy)]
pub struct StaticPrompt(pub bool);

#[async_trait]
impl PermissionPrompt for StaticPrompt {
    async fn ask(&self, _tool_id: &str, _args: &Value) -> Result<bool, PermissionError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_prompt_roundtrip() {
        let (prompt, mut rx) = ChannelPrompt::channel(1);
        let host = tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            assert_eq!(req.tool, "shell");
            req.grant();
        });
        assert_eq!(prompt.ask("shell", &Value::Null).await, Ok(true));
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_reply_is_an_error() {
        let (prompt, mut rx) = ChannelPrompt::channel(1);
        let host = tokio::spawn(async move {
            drop(rx.recv().await.unwrap());
        });
        assert_eq!(
            prompt.ask("shell", &Value::Null).await,
            Err(PermissionError::NoAnswer)
        );
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (prompt, rx) = ChannelPrompt::channel(1);
        drop(rx);
        assert_eq!(
            prompt.ask("shell", &Value::Null).await,
            Err(PermissionError::PromptClosed)
        );
    }
}
