//! 对外通知：checkpoint、回滚、处理完成、工具执行、状态切换
//!
//! 通过有界 broadcast 通道发出（fire-and-forget），宿主按需 subscribe；没有订阅者时直接丢弃。

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::LoopState;

const DEFAULT_EVENT_CAPACITY: usize = 128;

/// 单条事件（可序列化为 JSON 供 UI / 遥测消费）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 状态机发生转移
    StateChanged {
        session_id: String,
        from: LoopState,
        to: LoopState,
        iteration: usize,
    },
    /// 变更操作前的快照已就绪；bundle 对内核不透明
    CheckpointReady {
        session_id: String,
        tool_use_id: Option<String>,
        host_commit: Option<String>,
        checkpoint_id: String,
        #[serde(with = "bundle_base64")]
        bundle: Vec<u8>,
    },
    RollbackCompleted {
        session_id: String,
        commit_id: Option<String>,
        removed: usize,
    },
    ProcessingCompleted {
        session_id: String,
        response: String,
    },
    ToolStarted {
        session_id: String,
        invocation_id: String,
        tool: String,
        args: Value,
    },
    ToolCompleted {
        session_id: String,
        invocation_id: String,
        tool: String,
        args: Value,
        result: Value,
        duration_ms: u64,
    },
    ToolError {
        session_id: String,
        invocation_id: String,
        tool: String,
        args: Value,
        error: String,
        duration_ms: u64,
    },
    PermissionDenied {
        session_id: String,
        invocation_id: String,
        tool: String,
    },
    Aborted {
        session_id: String,
    },
}

mod bundle_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }
}

/// 有界事件总线；Clone 后共享同一通道
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscriber_is_noop() {
        let bus = EventBus::default();
        bus.emit(AgentEvent::Aborted {
            session_id: "s".into(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(AgentEvent::ProcessingCompleted {
            session_id: "s".into(),
            response: "done".into(),
        });
        match rx.recv().await.unwrap() {
            AgentEvent::ProcessingCompleted { response, .. } => assert_eq!(response, "done"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_event_json() {
        let ev = AgentEvent::CheckpointReady {
            session_id: "s".into(),
            tool_use_id: Some("t".into()),
            host_commit: None,
            checkpoint_id: "abc".into(),
            bundle: vec![0, 1, 2],
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "checkpoint_ready");
        assert_eq!(json["bundle"], "AAEC");
    }
}
