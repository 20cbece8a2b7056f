//! 回滚协调：取消进行中的查询 -> 恢复目标消息记录的快照 -> 截断 transcript -> 通知

use crate::core::events::{AgentEvent, EventBus};
use crate::core::session::SessionHandle;
use crate::core::AgentError;

/// 回滚结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// 从 transcript 删除的消息数；目标不存在时为 0
    pub removed: usize,
    /// 恢复到的快照 commit；目标早于任何快照时为 None
    pub commit_id: Option<String>,
}

pub struct RollbackCoordinator {
    bus: EventBus,
}

impl RollbackCoordinator {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// 回滚到 message_id：该消息及其后的消息被删除，环境恢复到该消息记录的快照
    pub async fn rollback(&self, handle: &SessionHandle, message_id: &str) -> Result<RollbackReport, AgentError> {
        // 先取消再加锁：正在运行的 Driver 观察到取消后退出并释放会话锁
        handle.control().abort_for_rollback();
        let mut session = handle.lock().await;
        // Driver 若已处理过这次取消，标记已被它消费；否则由这里清除
        session.control.take_suppress();
        session.control.reset_token();

        let Some(target) = session.transcript.get(message_id) else {
            tracing::warn!(session_id = %session.id, message_id, "rollback target not found, nothing changed");
            return Ok(RollbackReport {
                removed: 0,
                commit_id: None,
            });
        };
        let checkpoint_id = target.checkpoint_id.clone();

        let commit_id = match checkpoint_id {
            Some(id) => {
                let commit = session.env.restore(Some(&id)).await.map_err(|e| {
                    tracing::error!(session_id = %session.id, checkpoint_id = %id, error = %e, "restore failed, transcript left unchanged");
                    e
                })?;
                Some(commit)
            }
            None => {
                tracing::info!(session_id = %session.id, message_id, "target predates any checkpoint, trimming transcript only");
                None
            }
        };

        let removed = session.transcript.rollback_to(message_id);
        session.last_tool_error = None;
        tracing::info!(session_id = %session.id, message_id, removed, commit_id = ?commit_id, "rollback completed");
        self.bus.emit(AgentEvent::RollbackCompleted {
            session_id: session.id.clone(),
            commit_id: commit_id.clone(),
            removed,
        });
        Ok(RollbackReport { removed, commit_id })
    }
}
