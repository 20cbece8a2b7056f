//! 编排主循环（Orchestration Driver）
//!
//! 用户查询 -> 追加到 transcript -> 询问模型 -> 若为工具调用：权限 -> checkpoint -> 执行环境 -> 结果写回 ->
//! 继续询问模型，直到最终回复或观察到取消。每轮开头与每个挂起点之后都检查取消；
//! 取消时若有未配对的工具请求，先补一条 `{aborted: true}` 结果再进入 Aborted。

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::AgentSection;
use crate::core::events::{AgentEvent, EventBus};
use crate::core::session::Session;
use crate::core::state::{LoopEvent, LoopState};
use crate::core::AgentError;
use crate::llm::{ModelClient, ModelDecision, ModelRequest, ToolCall};
use crate::permission::{PermissionGate, PERMISSION_DENIED_MESSAGE};
use crate::tools::{ToolExecutor, ToolOutcome};
use crate::transcript::{ContentBlock, Role};

/// 一次查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// 终态：Complete 或 Aborted
    pub state: LoopState,
    /// 最终回复；被回滚抑制的中止没有回复
    pub response: Option<String>,
    /// 本次查询执行的循环轮数
    pub iterations: usize,
    /// 依次经过的状态（含起始 Idle）
    pub transitions: Vec<LoopState>,
}

/// 单次 run 的可变状态
struct RunState {
    state: LoopState,
    iterations: usize,
    transitions: Vec<LoopState>,
    pending: Option<ToolCall>,
}

impl RunState {
    fn finish(self, response: Option<String>) -> RunOutcome {
        RunOutcome {
            state: self.state,
            response,
            iterations: self.iterations,
            transitions: self.transitions,
        }
    }
}

/// 编排驱动：持有模型、工具执行器、权限闸门与事件总线；无会话状态，可被多个会话共享
pub struct Driver {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    gate: Arc<PermissionGate>,
    bus: EventBus,
    settings: AgentSection,
}

impl Driver {
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: ToolExecutor,
        gate: Arc<PermissionGate>,
        bus: EventBus,
        settings: AgentSection,
    ) -> Self {
        Self {
            model,
            executor,
            gate,
            bus,
            settings,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// 处理一条用户查询直至 Complete / Aborted；不可重入，调用方按会话串行
    pub async fn run(&self, session: &mut Session, query: &str) -> Result<RunOutcome, AgentError> {
        let token = session.control.token();
        let mut run = RunState {
            state: LoopState::Idle,
            iterations: 0,
            transitions: vec![LoopState::Idle],
            pending: None,
        };

        // 回滚到某条工具结果后，transcript 会以未配对的请求结尾
        if let Some(id) = session.transcript.pending_tool_request().map(str::to_string) {
            tracing::warn!(session_id = %session.id, invocation_id = %id, "closing unanswered tool request before new query");
            session
                .transcript
                .append_tool_result(&id, &ToolOutcome::Aborted.to_json())?;
        }

        let already_appended = session.transcript.peek_last().is_some_and(|m| {
            m.role == Role::User && m.tool_result().is_none() && m.text() == query
        });
        if already_appended {
            tracing::debug!(session_id = %session.id, "query already in transcript, not appending again");
        } else {
            session.transcript.append_user(query)?;
        }
        self.transition(session, &mut run, LoopEvent::UserMessage)?;

        loop {
            if token.is_cancelled() {
                return self.abort(session, run);
            }
            run.iterations += 1;
            tracing::debug!(session_id = %session.id, iteration = run.iterations, state = ?run.state, "driver iteration");

            match run.state {
                s if s.awaits_model() => {
                    if run.iterations > self.settings.max_iterations {
                        tracing::warn!(session_id = %session.id, max = self.settings.max_iterations, "iteration limit reached");
                        return Err(AgentError::IterationLimit(self.settings.max_iterations));
                    }
                    let specs = self.executor.specs();
                    let request = ModelRequest {
                        messages: session.transcript.messages(),
                        tools: &specs,
                        last_tool_error: session.last_tool_error.as_deref(),
                    };
                    let decision = tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        r = self.model.next_action(&request) => Some(r),
                    };
                    let Some(decision) = decision else {
                        return self.abort(session, run);
                    };
                    if token.is_cancelled() {
                        return self.abort(session, run);
                    }
                    let decision = decision.map_err(|e| {
                        tracing::error!(session_id = %session.id, error = %e, "model call failed");
                        e
                    })?;

                    match decision {
                        ModelDecision::FinalAnswer(text) => {
                            session
                                .transcript
                                .append_assistant(vec![ContentBlock::text(text.clone())])?;
                            self.transition(session, &mut run, LoopEvent::ModelFinalAnswer)?;
                            self.bus.emit(AgentEvent::ProcessingCompleted {
                                session_id: session.id.clone(),
                                response: text.clone(),
                            });
                            return Ok(run.finish(Some(text)));
                        }
                        ModelDecision::ToolCall(call) => {
                            session
                                .transcript
                                .append_tool_request(&call.id, &call.name, call.args.clone())?;
                            self.transition(session, &mut run, LoopEvent::ModelChoosesTool)?;
                            run.pending = Some(call);
                        }
                    }
                }
                LoopState::WaitingForToolResult => {
                    let Some(call) = run.pending.take() else {
                        return Err(AgentError::InvalidTransition(
                            crate::core::state::InvalidTransition {
                                state: run.state,
                                event: LoopEvent::ToolFinished,
                            },
                        ));
                    };
                    let Some(outcome) = self.execute_tool(session, &call, &token).await else {
                        return self.abort(session, run);
                    };
                    if token.is_cancelled() {
                        return self.abort(session, run);
                    }
                    match outcome.error() {
                        Some(e) => session.last_tool_error = Some(e.to_string()),
                        None => session.last_tool_error = None,
                    }
                    session
                        .transcript
                        .append_tool_result(&call.id, &outcome.to_json())?;
                    self.transition(session, &mut run, LoopEvent::ToolFinished)?;
                }
                state => {
                    // 终态在转移时已经返回
                    tracing::error!(session_id = %session.id, ?state, "driver loop reached unexpected state");
                    return Ok(run.finish(None));
                }
            }
        }
    }

    /// 权限 -> 绑定调用 id 的快照环境 -> 执行；返回 None 表示期间观察到取消
    async fn execute_tool(
        &self,
        session: &mut Session,
        call: &ToolCall,
        token: &CancellationToken,
    ) -> Option<ToolOutcome> {
        let granted = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            g = self.gate.request_permission(&call.name, &call.args) => g,
        };
        if token.is_cancelled() {
            return None;
        }
        if !granted {
            tracing::warn!(session_id = %session.id, tool = %call.name, invocation_id = %call.id, "permission denied");
            self.bus.emit(AgentEvent::PermissionDenied {
                session_id: session.id.clone(),
                invocation_id: call.id.clone(),
                tool: call.name.clone(),
            });
            return Some(ToolOutcome::Failure(PERMISSION_DENIED_MESSAGE.to_string()));
        }

        let env = session.env.clone();
        let invocation = env.for_invocation(&call.id);
        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            o = self.executor.execute(&session.id, &call.id, &call.name, call.args.clone(), &invocation) => Some(o),
        };
        if outcome.is_none() {
            // 执行器已发出 ToolStarted，这里补上配对的结束事件
            self.bus.emit(AgentEvent::ToolError {
                session_id: session.id.clone(),
                invocation_id: call.id.clone(),
                tool: call.name.clone(),
                args: call.args.clone(),
                error: "aborted".to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }
        // 即便被取消，已创建的快照也要记入 transcript 的 checkpoint 谱系
        if let Some(last) = invocation.checkpoints().last() {
            session.transcript.set_current_checkpoint(last.clone());
        }
        outcome
    }

    /// 中止路径：补齐未配对的工具请求 -> Aborted -> 换新令牌
    fn abort(&self, session: &mut Session, mut run: RunState) -> Result<RunOutcome, AgentError> {
        if let Some(id) = session.transcript.pending_tool_request().map(str::to_string) {
            session
                .transcript
                .append_tool_result(&id, &ToolOutcome::Aborted.to_json())?;
            tracing::info!(session_id = %session.id, invocation_id = %id, "synthesized aborted tool result");
        }
        self.transition(session, &mut run, LoopEvent::AbortRequested)?;

        let suppressed = session.control.take_suppress();
        session.control.reset_token();
        self.bus.emit(AgentEvent::Aborted {
            session_id: session.id.clone(),
        });

        let response = if suppressed {
            None
        } else {
            let ack = self.settings.abort_message.clone();
            self.bus.emit(AgentEvent::ProcessingCompleted {
                session_id: session.id.clone(),
                response: ack.clone(),
            });
            Some(ack)
        };
        tracing::info!(session_id = %session.id, suppressed, "query aborted");
        Ok(run.finish(response))
    }

    fn transition(&self, session: &Session, run: &mut RunState, event: LoopEvent) -> Result<(), AgentError> {
        let from = run.state;
        let to = from.next(event)?;
        run.state = to;
        run.transitions.push(to);
        tracing::info!(session_id = %session.id, ?from, ?to, ?event, "state transition");
        self.bus.emit(AgentEvent::StateChanged {
            session_id: session.id.clone(),
            from,
            to,
            iteration: run.iterations,
        });
        Ok(())
    }
}
