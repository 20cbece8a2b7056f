//! 带快照的执行环境装饰器
//!
//! 对写文件、编辑文件、执行命令三个变更操作：首次使用时初始化快照历史，随后先快照、
//! 发出 CheckpointReady，再委托给被装饰的后端；快照失败时变更不执行。
//! 只读操作直接透传。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::checkpoint::{CheckpointError, CheckpointMeta, CheckpointStore};
use crate::core::events::{AgentEvent, EventBus};
use crate::env::{
    CommandOutput, EditOutcome, EnvError, Encoding, Environment, GlobOptions, ListEntry,
    ReadOptions, VcsState,
};

/// 会话级装饰器：持有后端、快照存储与事件总线
pub struct CheckpointingEnvironment {
    inner: Arc<dyn Environment>,
    store: Arc<dyn CheckpointStore>,
    session_id: String,
    bus: EventBus,
    initialized: OnceCell<()>,
}

impl CheckpointingEnvironment {
    pub fn new(
        inner: Arc<dyn Environment>,
        store: Arc<dyn CheckpointStore>,
        session_id: impl Into<String>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner,
            store,
            session_id: session_id.into(),
            bus,
            initialized: OnceCell::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn inner(&self) -> &Arc<dyn Environment> {
        &self.inner
    }

    /// 绑定到一次工具调用：快照元数据带上 tool_use_id，并记录本次调用产生的快照
    pub fn for_invocation(&self, invocation_id: impl Into<String>) -> InvocationEnvironment<'_> {
        InvocationEnvironment {
            facade: self,
            invocation_id: invocation_id.into(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// 幂等：同一会话只初始化一次，失败时下次变更会重试
    pub async fn ensure_initialized(&self) -> Result<(), CheckpointError> {
        self.initialized
            .get_or_try_init(|| async {
                self.store
                    .init(self.inner.root(), &self.session_id, self.inner.as_ref())
                    .await
            })
            .await
            .map(|_| ())
    }

    /// 恢复到指定快照（None 为最近一次），返回恢复到的快照 id
    pub async fn restore(&self, checkpoint_id: Option<&str>) -> Result<String, CheckpointError> {
        self.ensure_initialized().await?;
        self.store
            .restore(&self.session_id, self.inner.as_ref(), self.inner.root(), checkpoint_id)
            .await
    }

    async fn checkpoint(&self, reason: &'static str, invocation_id: Option<&str>) -> Result<String, EnvError> {
        self.ensure_initialized()
            .await
            .map_err(|e| EnvError::Checkpoint(e.to_string()))?;

        let host_commit = match self.inner.vcs_state().await {
            Ok(state) => state.commit_id,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "host vcs state unavailable");
                None
            }
        };
        let mut meta = CheckpointMeta::new(&self.session_id, reason);
        meta.tool_use_id = invocation_id.map(str::to_string);
        meta.host_commit = host_commit.clone();

        let snapshot = self
            .store
            .snapshot(&meta, self.inner.as_ref(), self.inner.root())
            .await
            .map_err(|e| {
                tracing::error!(session_id = %self.session_id, reason, error = %e, "checkpoint failed; mutation skipped");
                EnvError::Checkpoint(e.to_string())
            })?;

        tracing::info!(
            session_id = %self.session_id,
            checkpoint_id = %snapshot.id,
            tool_use_id = invocation_id.unwrap_or("-"),
            reason,
            "checkpoint ready"
        );
        self.bus.emit(AgentEvent::CheckpointReady {
            session_id: self.session_id.clone(),
            tool_use_id: meta.tool_use_id,
            host_commit,
            checkpoint_id: snapshot.id.clone(),
            bundle: snapshot.bundle,
        });
        Ok(snapshot.id)
    }
}

#[async_trait]
impl Environment for CheckpointingEnvironment {
    fn root(&self) -> &str {
        self.inner.root()
    }

    async fn execute_command(&self, cmd: &str, cwd: Option<&str>) -> Result<CommandOutput, EnvError> {
        self.checkpoint("execute_command", None).await?;
        self.inner.execute_command(cmd, cwd).await
    }

    async fn read_file(&self, path: &str, options: &ReadOptions) -> Result<String, EnvError> {
        self.inner.read_file(path, options).await
    }

    async fn write_file(&self, path: &str, content: &str, encoding: Encoding) -> Result<(), EnvError> {
        self.checkpoint("write_file", None).await?;
        self.inner.write_file(path, content, encoding).await
    }

    async fn edit_file(
        &self,
        path: &str,
        search: &str,
        replace: &str,
        encoding: Encoding,
    ) -> Result<EditOutcome, EnvError> {
        self.checkpoint("edit_file", None).await?;
        self.inner.edit_file(path, search, replace, encoding).await
    }

    async fn list(&self, path: &str, show_hidden: bool, details: bool) -> Result<Vec<ListEntry>, EnvError> {
        self.inner.list(path, show_hidden, details).await
    }

    async fn glob(&self, pattern: &str, options: &GlobOptions) -> Result<Vec<String>, EnvError> {
        self.inner.glob(pattern, options).await
    }

    async fn vcs_state(&self) -> Result<VcsState, EnvError> {
        self.inner.vcs_state().await
    }
}

/// 单次工具调用视图
pub struct InvocationEnvironment<'a> {
    facade: &'a CheckpointingEnvironment,
    invocation_id: String,
    created: Mutex<Vec<String>>,
}

impl InvocationEnvironment<'_> {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// 本次调用产生的快照 id（按时间顺序）
    pub fn checkpoints(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn guard(&self, reason: &'static str) -> Result<(), EnvError> {
        let id = self
            .facade
            .checkpoint(reason, Some(&self.invocation_id))
            .await?;
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        Ok(())
    }
}

#[async_trait]
impl Environment for InvocationEnvironment<'_> {
    fn root(&self) -> &str {
        self.facade.root()
    }

    async fn execute_command(&self, cmd: &str, cwd: Option<&str>) -> Result<CommandOutput, EnvError> {
        self.guard("execute_command").await?;
        self.facade.inner.execute_command(cmd, cwd).await
    }

    async fn read_file(&self, path: &str, options: &ReadOptions) -> Result<String, EnvError> {
        self.facade.inner.read_file(path, options).await
    }

    async fn write_file(&self, path: &str, content: &str, encoding: Encoding) -> Result<(), EnvError> {
        self.guard("write_file").await?;
        self.facade.inner.write_file(path, content, encoding).await
    }

    async fn edit_file(
        &self,
        path: &str,
        search: &str,
        replace: &str,
        encoding: Encoding,
    ) -> Result<EditOutcome, EnvError> {
        self.guard("edit_file").await?;
        self.facade.inner.edit_file(path, search, replace, encoding).await
    }

    async fn list(&self, path: &str, show_hidden: bool, details: bool) -> Result<Vec<ListEntry>, EnvError> {
        self.facade.inner.list(path, show_hidden, details).await
    }

    async fn glob(&self, pattern: &str, options: &GlobOptions) -> Result<Vec<String>, EnvError> {
        self.facade.inner.glob(pattern, options).await
    }

    async fn vcs_state(&self) -> Result<VcsState, EnvError> {
        self.facade.inner.vcs_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{MemoryCheckpointStore, Snapshot};
    use crate::env::LocalEnvironment;

    /// 记录每次 init / snapshot 调用的存储包装
    struct RecordingStore {
        inner: MemoryCheckpointStore,
        inits: Mutex<usize>,
        reasons: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryCheckpointStore::new(),
                inits: Mutex::new(0),
                reasons: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for RecordingStore {
        async fn init(&self, root: &str, session_id: &str, env: &dyn Environment) -> Result<(), CheckpointError> {
            *self.inits.lock().unwrap() += 1;
            self.inner.init(root, session_id, env).await
        }

        async fn snapshot(
            &self,
            meta: &CheckpointMeta,
            env: &dyn Environment,
            root: &str,
        ) -> Result<Snapshot, CheckpointError> {
            self.reasons
                .lock()
                .unwrap()
                .push((meta.reason.clone(), meta.tool_use_id.clone()));
            self.inner.snapshot(meta, env, root).await
        }

        async fn restore(
            &self,
            session_id: &str,
            env: &dyn Environment,
            root: &str,
            checkpoint_id: Option<&str>,
        ) -> Result<String, CheckpointError> {
            self.inner.restore(session_id, env, root, checkpoint_id).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn init(&self, _: &str, _: &str, _: &dyn Environment) -> Result<(), CheckpointError> {
            Ok(())
        }

        async fn snapshot(&self, _: &CheckpointMeta, _: &dyn Environment, _: &str) -> Result<Snapshot, CheckpointError> {
            Err(CheckpointError::Bundle("disk full".into()))
        }

        async fn restore(&self, s: &str, _: &dyn Environment, _: &str, _: Option<&str>) -> Result<String, CheckpointError> {
            Err(CheckpointError::Empty(s.to_string()))
        }
    }

    #[tokio::test]
    async fn test_each_mutation_takes_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let inner: Arc<dyn Environment> = Arc::new(LocalEnvironment::new(dir.path()));
        let store = Arc::new(RecordingStore::new());
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let env = CheckpointingEnvironment::new(inner, store.clone(), "s", bus);

        let call = env.for_invocation("toolu_1");
        call.write_file("a.txt", "hello", Encoding::Utf8).await.unwrap();
        call.edit_file("a.txt", "hello", "bye", Encoding::Utf8)
            .await
            .unwrap();
        call.execute_command("true", None).await.unwrap();
        call.read_file("a.txt", &ReadOptions::default()).await.unwrap();
        call.list(".", false, false).await.unwrap();
        call.glob("*.txt", &GlobOptions::default()).await.unwrap();

        assert_eq!(*store.inits.lock().unwrap(), 1);
        let reasons = store.reasons.lock().unwrap().clone();
        assert_eq!(
            reasons,
            vec![
                ("write_file".to_string(), Some("toolu_1".to_string())),
                ("edit_file".to_string(), Some("toolu_1".to_string())),
                ("execute_command".to_string(), Some("toolu_1".to_string())),
            ]
        );
        assert_eq!(call.checkpoints().len(), 3);

        match rx.recv().await.unwrap() {
            AgentEvent::CheckpointReady { tool_use_id, .. } => {
                assert_eq!(tool_use_id.as_deref(), Some("toolu_1"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_snapshot_blocks_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let inner: Arc<dyn Environment> = Arc::new(LocalEnvironment::new(dir.path()));
        let env = CheckpointingEnvironment::new(inner, Arc::new(FailingStore), "s", EventBus::default());

        let err = env
            .write_file("a.txt", "hello", Encoding::Utf8)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Checkpoint(_)));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_restore_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let inner: Arc<dyn Environment> = Arc::new(LocalEnvironment::new(dir.path()));
        let env = CheckpointingEnvironment::new(
            inner,
            Arc::new(MemoryCheckpointStore::new()),
            "s",
            EventBus::default(),
        );

        let call = env.for_invocation("t1");
        call.write_file("a.txt", "v1", Encoding::Utf8).await.unwrap();
        let call = env.for_invocation("t2");
        call.write_file("a.txt", "v2", Encoding::Utf8).await.unwrap();
        let second = call.checkpoints()[0].clone();

        env.restore(Some(&second)).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "v1");
    }

    #[tokio::test]
    async fn test_edit_and_command_snapshots_precede_the_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "before").unwrap();
        let inner: Arc<dyn Environment> = Arc::new(LocalEnvironment::new(dir.path()));
        let env = CheckpointingEnvironment::new(
            inner,
            Arc::new(MemoryCheckpointStore::new()),
            "s",
            EventBus::default(),
        );

        let call = env.for_invocation("t1");
        call.edit_file("f.txt", "before", "edited", Encoding::Utf8)
            .await
            .unwrap();
        let out = call.execute_command("echo x > f.txt && mkdir made", None).await.unwrap();
        assert!(out.success());
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "x\n");
        let ids = call.checkpoints();
        assert_eq!(ids.len(), 2);

        env.restore(Some(&ids[1])).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "edited");
        assert!(!dir.path().join("made").exists());

        env.restore(Some(&ids[0])).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "before");
    }
}
