//! 工具执行器
//!
//! 按名查找工具并在给定执行环境上运行；发出 ToolStarted / ToolCompleted / ToolError 事件，
//! 每次调用输出结构化审计日志（JSON）。不施加超时：超时由执行环境负责，取消由 Driver 负责。

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::core::events::{AgentEvent, EventBus};
use crate::env::Environment;
use crate::tools::{Tool, ToolRegistry, ToolSpec};

/// 工具调用结果，写回 transcript 时 JSON 字符串化
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
    /// 调用被取消
    Aborted,
}

impl ToolOutcome {
    pub fn to_json(&self) -> Value {
        match self {
            ToolOutcome::Success(output) => json!({ "output": output }),
            ToolOutcome::Failure(error) => json!({ "error": error }),
            ToolOutcome::Aborted => json!({ "aborted": true }),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }
}

/// 工具执行器：持有注册表与事件总线
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    bus: EventBus,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, bus: EventBus) -> Self {
        Self { registry, bus }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行指定工具；未知工具与工具失败都转为 Failure，供模型在下一轮看到
    pub async fn execute(
        &self,
        session_id: &str,
        invocation_id: &str,
        tool_name: &str,
        args: Value,
        env: &dyn Environment,
    ) -> ToolOutcome {
        let start = Instant::now();
        let preview = args_preview(&args);
        self.bus.emit(AgentEvent::ToolStarted {
            session_id: session_id.to_string(),
            invocation_id: invocation_id.to_string(),
            tool: tool_name.to_string(),
            args: args.clone(),
        });

        let result = match self.registry.get(tool_name) {
            Some(tool) => tool.execute(env, args.clone()).await,
            None => Err(format!("Unknown tool: {tool_name}")),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = json!({
            "event": "tool_audit",
            "session_id": session_id,
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": if result.is_ok() { "ok" } else { "error" },
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => {
                self.bus.emit(AgentEvent::ToolCompleted {
                    session_id: session_id.to_string(),
                    invocation_id: invocation_id.to_string(),
                    tool: tool_name.to_string(),
                    args,
                    result: output.clone(),
                    duration_ms,
                });
                ToolOutcome::Success(output)
            }
            Err(error) => {
                tracing::warn!(tool = %tool_name, error = %error, "tool failed");
                self.bus.emit(AgentEvent::ToolError {
                    session_id: session_id.to_string(),
                    invocation_id: invocation_id.to_string(),
                    tool: tool_name.to_string(),
                    args,
                    error: error.clone(),
                    duration_ms,
                });
                ToolOutcome::Failure(error)
            }
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    #[test]
    fn test_outcome_json() {
        assert_eq!(
            ToolOutcome::Success(json!("x")).to_json(),
            json!({"output": "x"})
        );
        assert_eq!(
            ToolOutcome::Failure("boom".into()).to_json(),
            json!({"error": "boom"})
        );
        assert_eq!(ToolOutcome::Aborted.to_json(), json!({"aborted": true}));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({ "text": "a".repeat(500) });
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }

    #[tokio::test]
    async fn test_events_for_success_and_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::with_builtin_tools()), bus);

        let outcome = executor
            .execute("s", "t1", "list_dir", json!({}), &env)
            .await;
        assert_eq!(outcome, ToolOutcome::Success(json!([])));
        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::ToolStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::ToolCompleted { .. }));

        let outcome = executor.execute("s", "t2", "nope", json!({}), &env).await;
        assert_eq!(outcome.error(), Some("Unknown tool: nope"));
        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::ToolStarted { .. }));
        match rx.recv().await.unwrap() {
            AgentEvent::ToolError { invocation_id, .. } => assert_eq!(invocation_id, "t2"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
