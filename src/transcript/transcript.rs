//! Transcript：有序消息序列 + 当前 checkpoint id
//!
//! 只能通过 append_* 与 rollback_to 修改。不变式：工具请求消息之后必须紧跟唯一内容为匹配
//! ToolResult 的消息；未配对的请求只允许出现在最后一条（循环仍在进行中）。
//! debug 构建下每次追加后做全量校验，违反即回退本次追加并返回错误。

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::transcript::{ContentBlock, Message, Role};

/// Transcript 不变式被破坏（致命，不做静默修复）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("tool request '{id}' at #{index} is not followed by its result")]
    UnpairedToolRequest { index: usize, id: String },

    #[error("tool result for '{tool_use_id}' at #{index} has no matching request before it")]
    OrphanToolResult { index: usize, tool_use_id: String },

    #[error("tool request '{pending}' is still waiting for its result")]
    PendingToolRequest { pending: String },

    #[error("no pending tool request matches result '{0}'")]
    NoPendingRequest(String),

    #[error("message #{index} mixes tool blocks with other content")]
    MixedToolBlocks { index: usize },

    #[error("message #{index} has no content")]
    EmptyMessage { index: usize },
}

/// 会话 Transcript，由单个会话独占
#[derive(Clone, Debug, Default, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
    current_checkpoint: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn current_checkpoint(&self) -> Option<&str> {
        self.current_checkpoint.as_deref()
    }

    /// checkpoint-ready 之后由 Driver 调用，后续追加的消息继承该 checkpoint
    pub fn set_current_checkpoint(&mut self, checkpoint_id: impl Into<String>) {
        self.current_checkpoint = Some(checkpoint_id.into());
    }

    /// 最后一条消息；调用方用它判断用户输入是否已被追加，避免重复
    pub fn peek_last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 最后一条是尚未配对的工具请求时，返回其关联 id
    pub fn pending_tool_request(&self) -> Option<&str> {
        self.messages
            .last()
            .and_then(|m| m.tool_request())
            .map(|(id, _, _)| id)
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Result<&Message, TranscriptError> {
        self.ensure_no_pending()?;
        self.push(Role::User, vec![ContentBlock::text(text)])
    }

    /// 追加 assistant 文本回复；工具调用请走 append_tool_request
    pub fn append_assistant(
        &mut self,
        blocks: Vec<ContentBlock>,
    ) -> Result<&Message, TranscriptError> {
        self.ensure_no_pending()?;
        if blocks
            .iter()
            .any(|b| !matches!(b, ContentBlock::Text { .. }))
        {
            return Err(TranscriptError::MixedToolBlocks {
                index: self.messages.len(),
            });
        }
        self.push(Role::Assistant, blocks)
    }

    pub fn append_tool_request(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        args: Value,
    ) -> Result<&Message, TranscriptError> {
        self.ensure_no_pending()?;
        self.push(
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input: args,
            }],
        )
    }

    /// 追加工具结果；`result` 会被 JSON 字符串化后放入 tool_result 块
    pub fn append_tool_result(
        &mut self,
        correlation_id: &str,
        result: &Value,
    ) -> Result<&Message, TranscriptError> {
        if self.pending_tool_request() != Some(correlation_id) {
            return Err(TranscriptError::NoPendingRequest(correlation_id.to_string()));
        }
        self.push(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: correlation_id.to_string(),
                content: result.to_string(),
            }],
        )
    }

    /// 删除目标消息及其之后的全部消息，返回删除条数；目标不存在时返回 0 且不做任何修改。
    /// 之后 current_checkpoint 取新的最后一条消息所记录的值。
    pub fn rollback_to(&mut self, message_id: &str) -> usize {
        let Some(pos) = self.messages.iter().position(|m| m.id == message_id) else {
            return 0;
        };
        let removed = self.messages.len() - pos;
        self.messages.truncate(pos);
        self.current_checkpoint = self.messages.last().and_then(|m| m.checkpoint_id.clone());
        removed
    }

    /// 全量校验配对不变式
    pub fn validate(&self) -> Result<(), TranscriptError> {
        for (index, msg) in self.messages.iter().enumerate() {
            if msg.content.is_empty() {
                return Err(TranscriptError::EmptyMessage { index });
            }
            let has_tool_block = msg
                .content
                .iter()
                .any(|b| !matches!(b, ContentBlock::Text { .. }));

            if let Some((id, _, _)) = msg.tool_request() {
                if let Some(next) = self.messages.get(index + 1) {
                    match next.tool_result() {
                        Some((result_id, _)) if result_id == id => {}
                        _ => {
                            return Err(TranscriptError::UnpairedToolRequest {
                                index,
                                id: id.to_string(),
                            })
                        }
                    }
                }
            } else if let Some((tool_use_id, _)) = msg.tool_result() {
                let paired = index
                    .checked_sub(1)
                    .and_then(|i| self.messages.get(i))
                    .and_then(|prev| prev.tool_request())
                    .is_some_and(|(id, _, _)| id == tool_use_id);
                if !paired {
                    return Err(TranscriptError::OrphanToolResult {
                        index,
                        tool_use_id: tool_use_id.to_string(),
                    });
                }
            } else if has_tool_block {
                return Err(TranscriptError::MixedToolBlocks { index });
            }
        }
        Ok(())
    }

    /// 供模型调用的 wire 格式消息列表
    pub fn to_wire(&self) -> Vec<Value> {
        self.messages.iter().map(Message::to_wire).collect()
    }

    fn ensure_no_pending(&self) -> Result<(), TranscriptError> {
        match self.pending_tool_request() {
            Some(pending) => Err(TranscriptError::PendingToolRequest {
                pending: pending.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn push(&mut self, role: Role, content: Vec<ContentBlock>) -> Result<&Message, TranscriptError> {
        self.messages
            .push(Message::new(role, content, self.current_checkpoint.clone()));
        if cfg!(debug_assertions) {
            if let Err(e) = self.validate() {
                self.messages.pop();
                return Err(e);
            }
        }
        Ok(&self.messages[self.messages.len() - 1])
    }
}
