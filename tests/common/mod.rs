//! 集成测试共用：记录快照调用的存储、阻塞工具、Agent 装配

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use waypoint::checkpoint::{CheckpointError, CheckpointMeta, CheckpointStore, MemoryCheckpointStore, Snapshot};
use waypoint::config::AppConfig;
use waypoint::core::SessionHandle;
use waypoint::env::{Encoding, Environment, LocalEnvironment};
use waypoint::llm::{Script, ScriptedModel};
use waypoint::tools::{Tool, ToolCategory, ToolRegistry};
use waypoint::Agent;

/// 包装内存存储，记录每次 snapshot 的 (reason, tool_use_id, 返回的 id)
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryCheckpointStore,
    pub snapshots: Mutex<Vec<(String, Option<String>, String)>>,
    pub restores: Mutex<Vec<Option<String>>>,
}

impl RecordingStore {
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn init(&self, root: &str, session_id: &str, env: &dyn Environment) -> Result<(), CheckpointError> {
        self.inner.init(root, session_id, env).await
    }

    async fn snapshot(
        &self,
        meta: &CheckpointMeta,
        env: &dyn Environment,
        root: &str,
    ) -> Result<Snapshot, CheckpointError> {
        let snap = self.inner.snapshot(meta, env, root).await?;
        self.snapshots.lock().unwrap().push((
            meta.reason.clone(),
            meta.tool_use_id.clone(),
            snap.id.clone(),
        ));
        Ok(snap)
    }

    async fn restore(
        &self,
        session_id: &str,
        env: &dyn Environment,
        root: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<String, CheckpointError> {
        self.restores
            .lock()
            .unwrap()
            .push(checkpoint_id.map(str::to_string));
        self.inner.restore(session_id, env, root, checkpoint_id).await
    }
}

/// 先写一个文件（触发快照），再一直挂起直到被取消
pub struct BlockingWriteTool {
    pub started: Arc<Notify>,
}

#[async_trait]
impl Tool for BlockingWriteTool {
    fn name(&self) -> &str {
        "slow_write"
    }

    fn description(&self) -> &str {
        "writes a file then blocks forever"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Edit
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let path = args["path"].as_str().unwrap_or("slow.txt").to_string();
        env.write_file(&path, "partial", Encoding::Utf8)
            .await
            .map_err(|e| e.to_string())?;
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(json!(null))
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub agent: Arc<Agent>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<RecordingStore>,
    pub session: SessionHandle,
}

pub fn config(fast_mode: bool) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.permissions.fast_mode = fast_mode;
    cfg
}

pub fn harness(script: Vec<Script>, cfg: AppConfig, registry: ToolRegistry) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(script));
    let store = Arc::new(RecordingStore::default());
    let agent = Arc::new(
        Agent::builder(model.clone())
            .config(cfg)
            .tools(registry)
            .checkpoint_store(store.clone())
            .without_retry()
            .build()
            .unwrap(),
    );
    let env = LocalEnvironment::new(dir.path());
    let session = agent.open_session_with_id("test-session", Arc::new(env));
    Harness {
        dir,
        agent,
        model,
        store,
        session,
    }
}
