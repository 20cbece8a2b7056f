//! 权限闸门：每次工具调用前的 yes/no 决策
//!
//! 评估顺序：未知工具 → danger mode → 按工具 always ask → fast mode 类别放行 →
//! 工具自身是否声明需要授权 → 交互确认。对 transcript 与 checkpoint 无副作用。

pub mod prompt;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::tools::{ToolCategory, ToolRegistry};

pub use prompt::{ChannelPrompt, PermissionPrompt, PermissionRequest, StaticPrompt};

/// 拒绝时写回 transcript 的固定信息
pub const PERMISSION_DENIED_MESSAGE: &str = "Permission denied by user";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission prompt channel closed")]
    PromptClosed,

    #[error("permission request dropped without an answer")]
    NoAnswer,
}

/// 权限策略（对应配置 `[permissions]` 段）
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionPolicy {
    /// 全部自动放行，仅用于沙箱
    #[serde(default)]
    pub danger_mode: bool,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default = "default_fast_mode_categories")]
    pub fast_mode_categories: Vec<ToolCategory>,
    /// 始终询问的工具，优先于其它所有规则（danger mode 除外）
    #[serde(default)]
    pub always_ask: HashSet<String>,
}

fn default_fast_mode_categories() -> Vec<ToolCategory> {
    vec![ToolCategory::Edit]
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            danger_mode: false,
            fast_mode: false,
            fast_mode_categories: default_fast_mode_categories(),
            always_ask: HashSet::new(),
        }
    }
}

/// 纯策略判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant,
    Ask,
}

/// 权限闸门
pub struct PermissionGate {
    policy: PermissionPolicy,
    registry: Arc<ToolRegistry>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
}

impl PermissionGate {
    pub fn new(policy: PermissionPolicy, registry: Arc<ToolRegistry>) -> Self {
        Self {
            policy,
            registry,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn decide(&self, tool_id: &str) -> Decision {
        let Some(tool) = self.registry.get(tool_id) else {
            return Decision::Ask;
        };
        if self.policy.danger_mode {
            return Decision::Grant;
        }
        if self.policy.always_ask.contains(tool_id) {
            return Decision::Ask;
        }
        if self.policy.fast_mode && self.policy.fast_mode_categories.contains(&tool.category()) {
            return Decision::Grant;
        }
        if !tool.requires_permission() {
            return Decision::Grant;
        }
        Decision::Ask
    }

    /// 需要交互时经由 prompt 询问；没有 prompt 或 prompt 失败一律拒绝
    pub async fn request_permission(&self, tool_id: &str, args: &Value) -> bool {
        if self.decide(tool_id) == Decision::Grant {
            return true;
        }
        let Some(prompt) = &self.prompt else {
            tracing::warn!(tool = %tool_id, "permission required but no prompt configured; denying");
            return false;
        };
        match prompt.ask(tool_id, args).await {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(tool = %tool_id, error = %e, "permission prompt failed; denying");
                false
            }
        }
    }
}
