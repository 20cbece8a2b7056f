//! Driver 状态机：状态、事件与纯转移函数
//!
//! Idle → WaitingForModel → {WaitingForToolResult → WaitingForModelFinal → …} | Complete | Aborted；
//! 任意状态收到 AbortRequested 都进入 Aborted。Complete / Aborted 为终态。

use serde::Serialize;
use thiserror::Error;

/// 编排循环状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    WaitingForModel,
    WaitingForToolResult,
    /// 工具结果已写回，等待模型决定继续调工具或给出最终回复
    WaitingForModelFinal,
    Complete,
    Aborted,
}

/// 驱动状态转移的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEvent {
    UserMessage,
    ModelChoosesTool,
    ModelFinalAnswer,
    ToolFinished,
    AbortRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in state {state:?}")]
pub struct InvalidTransition {
    pub state: LoopState,
    pub event: LoopEvent,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Complete | LoopState::Aborted)
    }

    /// 等待模型的两个状态
    pub fn awaits_model(self) -> bool {
        matches!(self, LoopState::WaitingForModel | LoopState::WaitingForModelFinal)
    }

    pub fn next(self, event: LoopEvent) -> Result<LoopState, InvalidTransition> {
        use LoopEvent as E;
        use LoopState as S;

        match (self, event) {
            (s, E::AbortRequested) if !s.is_terminal() => Ok(S::Aborted),
            (S::Idle, E::UserMessage) => Ok(S::WaitingForModel),
            (S::WaitingForModel | S::WaitingForModelFinal, E::ModelChoosesTool) => {
                Ok(S::WaitingForToolResult)
            }
            (S::WaitingForModel | S::WaitingForModelFinal, E::ModelFinalAnswer) => Ok(S::Complete),
            (S::WaitingForToolResult, E::ToolFinished) => Ok(S::WaitingForModelFinal),
            (state, event) => Err(InvalidTransition { state, event }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_answer_path() {
        let s = LoopState::Idle.next(LoopEvent::UserMessage).unwrap();
        assert_eq!(s, LoopState::WaitingForModel);
        assert_eq!(s.next(LoopEvent::ModelFinalAnswer).unwrap(), LoopState::Complete);
    }

    #[test]
    fn test_tool_chaining_path() {
        let mut s = LoopState::Idle.next(LoopEvent::UserMessage).unwrap();
        s = s.next(LoopEvent::ModelChoosesTool).unwrap();
        s = s.next(LoopEvent::ToolFinished).unwrap();
        assert_eq!(s, LoopState::WaitingForModelFinal);
        s = s.next(LoopEvent::ModelChoosesTool).unwrap();
        assert_eq!(s, LoopState::WaitingForToolResult);
        s = s.next(LoopEvent::ToolFinished).unwrap();
        assert_eq!(s.next(LoopEvent::ModelFinalAnswer).unwrap(), LoopState::Complete);
    }

    #[test]
    fn test_abort_from_any_live_state() {
        for s in [
            LoopState::Idle,
            LoopState::WaitingForModel,
            LoopState::WaitingForToolResult,
            LoopState::WaitingForModelFinal,
        ] {
            assert_eq!(s.next(LoopEvent::AbortRequested).unwrap(), LoopState::Aborted);
        }
    }

    #[test]
    fn test_terminal_states_reject_events() {
        assert!(LoopState::Complete.next(LoopEvent::AbortRequested).is_err());
        assert!(LoopState::Aborted.next(LoopEvent::UserMessage).is_err());
        assert!(LoopState::Idle.next(LoopEvent::ToolFinished).is_err());
        assert!(LoopState::WaitingForToolResult
            .next(LoopEvent::ModelFinalAnswer)
            .is_err());
    }
}
