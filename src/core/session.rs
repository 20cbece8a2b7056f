//! 会话上下文：transcript、取消控制、带快照的执行环境
//!
//! 每个会话一份，显式传入 Driver 与 RollbackCoordinator，不存在进程级共享表。
//! SessionControl 可在不持有会话锁的情况下取消当前查询（Ctrl+C 或回滚）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointingEnvironment;
use crate::transcript::Transcript;

/// 会话级取消控制：可替换的取消令牌 + 一次性的「抑制中止回复」标记
#[derive(Debug, Default)]
pub struct SessionControl {
    token: Mutex<CancellationToken>,
    suppress_abort_ack: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前令牌（Driver 在每次 run 开始时取一次）
    pub fn token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 取消当前查询（用户中断）
    pub fn cancel(&self) {
        self.token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }

    /// 由回滚触发的取消：Driver 不再输出通用的中止回复
    pub fn abort_for_rollback(&self) {
        self.suppress_abort_ack.store(true, Ordering::SeqCst);
        self.cancel();
    }

    /// 读取并清除抑制标记
    pub fn take_suppress(&self) -> bool {
        self.suppress_abort_ack.swap(false, Ordering::SeqCst)
    }

    /// 中止处理完毕后换上新令牌，会话可继续接受查询
    pub fn reset_token(&self) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
    }
}

/// 单个会话的全部状态
pub struct Session {
    pub id: String,
    pub transcript: Transcript,
    pub control: Arc<SessionControl>,
    /// 最近一次工具失败的信息，下一次成功后清空
    pub last_tool_error: Option<String>,
    pub env: Arc<CheckpointingEnvironment>,
}

impl Session {
    pub fn new(env: Arc<CheckpointingEnvironment>) -> Self {
        Self {
            id: env.session_id().to_string(),
            transcript: Transcript::new(),
            control: Arc::new(SessionControl::new()),
            last_tool_error: None,
            env,
        }
    }
}

/// 宿主持有的会话句柄：取消无需加锁，run / rollback 经由异步互斥串行
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    control: Arc<SessionControl>,
    session: Arc<tokio::sync::Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            control: session.control.clone(),
            session: Arc::new(tokio::sync::Mutex::new(session)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> &Arc<SessionControl> {
        &self.control
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// 查询运行中时返回 None
    pub fn try_lock(&self) -> Option<tokio::sync::MutexGuard<'_, Session>> {
        self.session.try_lock().ok()
    }
}
