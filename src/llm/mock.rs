//! Mock 模型（用于测试与本地试跑，无需 API）
//!
//! - **ScriptedModel**：按脚本依次返回决策 / 错误，或一直挂起直到被取消
//! - **EchoModel**：回显最后一条用户消息；`run <cmd>` 触发一次 shell 工具调用

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::llm::{ModelClient, ModelDecision, ModelError, ModelRequest, ToolCall};
use crate::transcript::Role;

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum Script {
    Decide(ModelDecision),
    Error(ModelError),
    /// 永不返回，用于测试中途取消
    Hang,
}

impl Script {
    pub fn answer(text: impl Into<String>) -> Self {
        Script::Decide(ModelDecision::FinalAnswer(text.into()))
    }

    pub fn tool(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Script::Decide(ModelDecision::ToolCall(ToolCall::new(id, name, args)))
    }
}

/// 脚本化模型：记录每次调用看到的 transcript（wire 格式）与工具错误槽
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<Vec<Value>>>,
    tool_errors: Mutex<Vec<Option<String>>>,
}

impl ScriptedModel {
    pub fn new(steps: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
            tool_errors: Mutex::new(Vec::new()),
        }
    }

    /// 追加脚本步骤（多轮测试中逐轮补充）
    pub fn push(&self, step: Script) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 每次调用时的 last_tool_error
    pub fn tool_errors(&self) -> Vec<Option<String>> {
        self.tool_errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 每次调用时的 transcript 快照
    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn next_action(&self, request: &ModelRequest<'_>) -> Result<ModelDecision, ModelError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.messages.iter().map(|m| m.to_wire()).collect());
        self.tool_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.last_tool_error.map(str::to_string));
        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match step {
            Some(Script::Decide(d)) => Ok(d),
            Some(Script::Error(e)) => Err(e),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(ModelError::InvalidResponse("script exhausted".into())),
        }
    }
}

/// 回显模型
#[derive(Debug, Default)]
pub struct EchoModel;

#[async_trait]
impl ModelClient for EchoModel {
    async fn next_action(&self, request: &ModelRequest<'_>) -> Result<ModelDecision, ModelError> {
        let Some(last) = request.messages.last() else {
            return Ok(ModelDecision::FinalAnswer("(no input)".into()));
        };
        if let Some((_, content)) = last.tool_result() {
            return Ok(ModelDecision::FinalAnswer(format!("Tool returned: {content}")));
        }
        let text = if last.role == Role::User {
            last.text()
        } else {
            String::new()
        };
        if let Some(cmd) = text.trim().strip_prefix("run ") {
            let available = request.tools.iter().any(|t| t.name == "shell");
            if available {
                return Ok(ModelDecision::ToolCall(ToolCall::new(
                    format!("toolu_{}", Uuid::new_v4().simple()),
                    "shell",
                    json!({ "command": cmd }),
                )));
            }
        }
        Ok(ModelDecision::FinalAnswer(format!("Echo: {text}")))
    }
}
