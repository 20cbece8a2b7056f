//! Transcript 消息：角色、内容块与模型 API 的 wire 格式
//!
//! 内容块是封闭的三变体联合（Text / ToolUse / ToolResult），序列化结果与模型 API 一致：
//! `{"type": "tool_use", "id", "name", "input"}`、`{"type": "tool_result", "tool_use_id", "content"}`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 消息角色（与模型 API 一致，工具结果以 user 角色回传）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 单个内容块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// 模型发起的工具调用，`id` 为本次调用的关联 id
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// 工具结果，`content` 是 JSON 字符串化后的工具产出
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Transcript 中的一条消息；`checkpoint_id` 为创建时已知的最近一个 checkpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub created_at: DateTime<Utc>,
    pub checkpoint_id: Option<String>,
}

impl Message {
    pub(crate) fn new(role: Role, content: Vec<ContentBlock>, checkpoint_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
            checkpoint_id,
        }
    }

    /// 若本消息是一个工具调用请求（assistant 角色、唯一内容为 ToolUse），返回 (id, name, input)
    pub fn tool_request(&self) -> Option<(&str, &str, &Value)> {
        match (self.role, self.content.as_slice()) {
            (Role::Assistant, [ContentBlock::ToolUse { id, name, input }]) => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        }
    }

    /// 若本消息是一个工具结果（user 角色、唯一内容为 ToolResult），返回 (tool_use_id, content)
    pub fn tool_result(&self) -> Option<(&str, &str)> {
        match (self.role, self.content.as_slice()) {
            (Role::User, [ContentBlock::ToolResult { tool_use_id, content }]) => {
                Some((tool_use_id.as_str(), content.as_str()))
            }
            _ => None,
        }
    }

    /// 拼接全部 Text 块
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// 模型 API 的消息格式：`{"role": ..., "content": [...]}`
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "role": self.role,
            "content": self.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_use_wire_shape() {
        let msg = Message::new(
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "a.txt"}),
            }],
            None,
        );
        assert_eq!(
            msg.to_wire(),
            serde_json::json!({
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a.txt"}}]
            })
        );
        assert!(msg.tool_request().is_some());
        assert!(msg.tool_result().is_none());
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let msg = Message::new(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: r#"{"aborted":true}"#.into(),
            }],
            Some("chk".into()),
        );
        assert_eq!(
            msg.to_wire(),
            serde_json::json!({
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "{\"aborted\":true}"}]
            })
        );
        assert_eq!(msg.tool_result(), Some(("toolu_1", r#"{"aborted":true}"#)));
    }

    #[test]
    fn test_text_joins_blocks() {
        let msg = Message::new(
            Role::Assistant,
            vec![ContentBlock::text("Hello, "), ContentBlock::text("world")],
            None,
        );
        assert_eq!(msg.text(), "Hello, world");
    }
}
