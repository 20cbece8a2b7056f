//! Agent 运行时装配
//!
//! AgentBuilder 按配置组装模型（带重试）、工具注册表、权限闸门、快照存储与事件总线；
//! Agent 为每个会话创建带快照的执行环境，并提供 run / rollback 两个入口。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, CheckpointingEnvironment, GitCheckpointStore, MemoryCheckpointStore};
use crate::config::{AppConfig, CheckpointBackend};
use crate::core::{
    AgentError, AgentEvent, Driver, EventBus, RollbackCoordinator, RollbackReport, RunOutcome, Session,
    SessionHandle,
};
use crate::env::{Environment, LocalEnvironment};
use crate::llm::{ModelClient, RetryingModelClient};
use crate::permission::{PermissionGate, PermissionPrompt};
use crate::tools::{ToolExecutor, ToolRegistry};

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    model: Arc<dyn ModelClient>,
    registry: Option<ToolRegistry>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    store: Option<Arc<dyn CheckpointStore>>,
    retry: bool,
}

impl AgentBuilder {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            config: AppConfig::default(),
            model,
            registry: None,
            prompt: None,
            store: None,
            retry: true,
        }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认的内置工具集
    pub fn tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn permission_prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// 显式指定快照存储，忽略配置中的 backend
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 关闭模型重试包装（测试中使用脚本化模型时）
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let bus = EventBus::new(self.config.agent.event_capacity);
        let registry = Arc::new(self.registry.unwrap_or_else(ToolRegistry::with_builtin_tools));

        let model: Arc<dyn ModelClient> = if self.retry {
            Arc::new(RetryingModelClient::new(self.model, self.config.model.clone()))
        } else {
            self.model
        };

        let mut gate = PermissionGate::new(self.config.permissions.clone(), registry.clone());
        if let Some(prompt) = self.prompt {
            gate = gate.with_prompt(prompt);
        }

        let store = match self.store {
            Some(store) => store,
            None => store_from_config(&self.config)?,
        };

        let driver = Driver::new(
            model,
            ToolExecutor::new(registry, bus.clone()),
            Arc::new(gate),
            bus.clone(),
            self.config.agent.clone(),
        );
        tracing::info!(backend = ?self.config.checkpoint.backend, max_iterations = self.config.agent.max_iterations, "agent built");

        Ok(Agent {
            rollback: RollbackCoordinator::new(bus.clone()),
            driver,
            store,
            bus,
            config: self.config,
        })
    }
}

fn store_from_config(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>, AgentError> {
    match config.checkpoint.backend {
        CheckpointBackend::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
        CheckpointBackend::Git => {
            let dir = absolute(config.checkpoint.store_dir())?;
            std::fs::create_dir_all(&dir)
                .map_err(|e| AgentError::Config(format!("cannot create checkpoint dir {}: {e}", dir.display())))?;
            Ok(Arc::new(GitCheckpointStore::new(dir)))
        }
    }
}

/// 侧存储路径必须是绝对路径：git 命令在环境根下执行
fn absolute(path: PathBuf) -> Result<PathBuf, AgentError> {
    if path.is_absolute() {
        return Ok(path);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| AgentError::Config(format!("cannot resolve current dir: {e}")))
}

/// 组装完成的 Agent：多会话共享，会话之间完全独立
pub struct Agent {
    driver: Driver,
    rollback: RollbackCoordinator,
    store: Arc<dyn CheckpointStore>,
    bus: EventBus,
    config: AppConfig,
}

impl Agent {
    pub fn builder(model: Arc<dyn ModelClient>) -> AgentBuilder {
        AgentBuilder::new(model)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按 `[environment]` 段创建本地执行环境（根目录不存在时创建）
    pub fn local_environment(&self) -> Result<LocalEnvironment, AgentError> {
        let env_cfg = &self.config.environment;
        std::fs::create_dir_all(&env_cfg.root).map_err(|e| {
            AgentError::Config(format!("cannot create workspace {}: {e}", env_cfg.root.display()))
        })?;
        Ok(LocalEnvironment::new(&env_cfg.root)
            .with_command_timeout(env_cfg.command_timeout_secs)
            .with_max_read_bytes(env_cfg.max_read_bytes))
    }

    pub fn open_session(&self, env: Arc<dyn Environment>) -> SessionHandle {
        self.open_session_with_id(Uuid::new_v4().to_string(), env)
    }

    /// 用给定后端开一个会话；变更操作经由带快照的装饰器
    pub fn open_session_with_id(&self, session_id: impl Into<String>, env: Arc<dyn Environment>) -> SessionHandle {
        let session_id = session_id.into();
        let facade = CheckpointingEnvironment::new(env, self.store.clone(), session_id.clone(), self.bus.clone());
        tracing::info!(session_id = %session_id, root = %facade.inner().root(), "session opened");
        SessionHandle::new(Session::new(Arc::new(facade)))
    }

    /// 处理一条查询；同一会话的查询与回滚串行执行
    pub async fn run(&self, handle: &SessionHandle, query: &str) -> Result<RunOutcome, AgentError> {
        let mut session = handle.lock().await;
        self.driver.run(&mut session, query).await
    }

    pub async fn rollback(&self, handle: &SessionHandle, message_id: &str) -> Result<RollbackReport, AgentError> {
        self.rollback.rollback(handle, message_id).await
    }
}
