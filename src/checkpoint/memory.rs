//! 进程内快照存储
//!
//! 快照时经由执行环境 glob + read_file(base64) 抓取环境根下所有文件，整体序列化为 bundle，
//! id = sha256(bundle)；恢复时删除快照之后新增的文件与目录，补建快照中的目录，再把文件内容逐个写回。
//! 不依赖 git，适合测试与无 git 的沙箱后端。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::checkpoint::{shell_quote, CheckpointError, CheckpointMeta, CheckpointStore, Snapshot};
use crate::env::{Encoding, Environment, GlobOptions, ReadOptions};

/// 单个快照：父快照 id + 元数据 + 目录 + 文件内容（相对路径 → base64）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub id: String,
    pub parent: Option<String>,
    pub meta: CheckpointMeta,
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct BundleBody<'a> {
    parent: Option<&'a str>,
    meta: &'a CheckpointMeta,
    dirs: &'a BTreeSet<String>,
    files: &'a BTreeMap<String, String>,
}

/// 环境根下的目录集合与文件内容
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, String>,
}

/// 内存快照存储：每会话一条快照链
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<String, Vec<StoredCheckpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 会话快照历史（旧 → 新）
    pub async fn history(&self, session_id: &str) -> Vec<StoredCheckpoint> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn capture(env: &dyn Environment, root: &str) -> Result<Tree, CheckpointError> {
        let mut options = GlobOptions {
            cwd: Some(root.to_string()),
            include_hidden: true,
            files_only: true,
            max_results: Some(usize::MAX),
        };
        let read = ReadOptions {
            max_size: Some(u64::MAX),
            encoding: Encoding::Base64,
            ..Default::default()
        };
        let mut files = BTreeMap::new();
        for rel in env.glob("**/*", &options).await? {
            if is_vcs_path(&rel) {
                continue;
            }
            let content = env.read_file(&join(root, &rel), &read).await?;
            files.insert(rel, content);
        }

        options.files_only = false;
        let dirs = env
            .glob("**/*", &options)
            .await?
            .into_iter()
            .filter(|rel| !is_vcs_path(rel) && !files.contains_key(rel))
            .collect();
        Ok(Tree { dirs, files })
    }
}

fn is_vcs_path(rel: &str) -> bool {
    rel == ".git" || rel.starts_with(".git/")
}

fn join(root: &str, rel: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), rel)
}

/// 对一组相对路径执行同一条命令
async fn run_paths(
    env: &dyn Environment,
    step: &'static str,
    cmd: &str,
    root: &str,
    paths: Vec<&String>,
) -> Result<(), CheckpointError> {
    let mut line = cmd.to_string();
    for rel in paths {
        line.push(' ');
        line.push_str(&shell_quote(&join(root, rel))?);
    }
    let out = env.execute_command(&line, None).await?;
    if !out.success() {
        return Err(CheckpointError::Command {
            step,
            detail: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn init(&self, _root: &str, session_id: &str, _env: &dyn Environment) -> Result<(), CheckpointError> {
        self.sessions
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default();
        Ok(())
    }

    async fn snapshot(
        &self,
        meta: &CheckpointMeta,
        env: &dyn Environment,
        root: &str,
    ) -> Result<Snapshot, CheckpointError> {
        let parent = {
            let sessions = self.sessions.lock().await;
            let chain = sessions
                .get(&meta.session_id)
                .ok_or_else(|| CheckpointError::NotInitialized(meta.session_id.clone()))?;
            chain.last().map(|c| c.id.clone())
        };

        let Tree { dirs, files } = Self::capture(env, root).await?;
        let bundle = serde_json::to_vec(&BundleBody {
            parent: parent.as_deref(),
            meta,
            dirs: &dirs,
            files: &files,
        })
        .map_err(|e| CheckpointError::Bundle(e.to_string()))?;
        let id = hex::encode(Sha256::digest(&bundle));

        let mut sessions = self.sessions.lock().await;
        let chain = sessions.entry(meta.session_id.clone()).or_default();
        chain.push(StoredCheckpoint {
            id: id.clone(),
            parent,
            meta: meta.clone(),
            dirs,
            files,
        });
        tracing::debug!(session_id = %meta.session_id, checkpoint_id = %id, depth = chain.len(), "in-memory checkpoint stored");
        Ok(Snapshot { id, bundle })
    }

    async fn restore(
        &self,
        session_id: &str,
        env: &dyn Environment,
        root: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<String, CheckpointError> {
        let target = {
            let sessions = self.sessions.lock().await;
            let chain = sessions
                .get(session_id)
                .ok_or_else(|| CheckpointError::NotInitialized(session_id.to_string()))?;
            match checkpoint_id {
                Some(id) => chain
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .ok_or_else(|| CheckpointError::NotFound {
                        session_id: session_id.to_string(),
                        id: id.to_string(),
                    })?,
                None => chain
                    .last()
                    .cloned()
                    .ok_or_else(|| CheckpointError::Empty(session_id.to_string()))?,
            }
        };

        let current = Self::capture(env, root).await?;
        let stale: Vec<&String> = current
            .files
            .keys()
            .filter(|k| !target.files.contains_key(*k))
            .chain(current.dirs.iter().filter(|d| !target.dirs.contains(*d)))
            .collect();
        if !stale.is_empty() {
            // 多出的目录里不可能有快照中的文件，整棵删除
            run_paths(env, "remove", "rm -rf --", root, stale).await?;
        }
        let missing: Vec<&String> = target
            .dirs
            .iter()
            .filter(|d| !current.dirs.contains(*d))
            .collect();
        if !missing.is_empty() {
            run_paths(env, "mkdir", "mkdir -p --", root, missing).await?;
        }
        for (rel, content) in &target.files {
            if current.files.get(rel) == Some(content) {
                continue;
            }
            env.write_file(&join(root, rel), content, Encoding::Base64)
                .await?;
        }

        tracing::info!(session_id, checkpoint_id = %target.id, files = target.files.len(), "environment restored");
        Ok(target.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    #[tokio::test]
    async fn test_snapshot_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let store = MemoryCheckpointStore::new();
        let meta = CheckpointMeta::new("s", "write_file");
        let err = store.snapshot(&meta, &env, env.root()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_snapshot_chain_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let root = env.root().to_string();
        let store = MemoryCheckpointStore::new();
        store.init(&root, "s", &env).await.unwrap();
        store.init(&root, "s", &env).await.unwrap();

        env.write_file("a.txt", "one", Encoding::Utf8).await.unwrap();
        let first = store
            .snapshot(&CheckpointMeta::new("s", "write_file"), &env, &root)
            .await
            .unwrap();
        assert_eq!(first.id.len(), 64);

        env.write_file("a.txt", "two", Encoding::Utf8).await.unwrap();
        env.write_file("nested/b.txt", "new", Encoding::Utf8)
            .await
            .unwrap();
        let second = store
            .snapshot(&CheckpointMeta::new("s", "edit_file"), &env, &root)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let history = store.history("s").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].parent.as_deref(), Some(first.id.as_str()));

        let restored = store
            .restore("s", &env, &root, Some(&first.id))
            .await
            .unwrap();
        assert_eq!(restored, first.id);
        let a = env.read_file("a.txt", &ReadOptions::default()).await.unwrap();
        assert_eq!(a, "one");
        assert!(!dir.path().join("nested/b.txt").exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_restore_resets_directories() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let root = env.root().to_string();
        let store = MemoryCheckpointStore::new();
        store.init(&root, "s", &env).await.unwrap();

        std::fs::create_dir(dir.path().join("keep_empty")).unwrap();
        let snap = store
            .snapshot(&CheckpointMeta::new("s", "execute_command"), &env, &root)
            .await
            .unwrap();
        assert!(store.history("s").await[0].dirs.contains("keep_empty"));

        env.write_file("nested/deep/b.txt", "new", Encoding::Utf8)
            .await
            .unwrap();
        std::fs::remove_dir(dir.path().join("keep_empty")).unwrap();

        store.restore("s", &env, &root, Some(&snap.id)).await.unwrap();
        assert!(!dir.path().join("nested").exists());
        assert!(dir.path().join("keep_empty").is_dir());
    }

    #[tokio::test]
    async fn test_restore_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let store = MemoryCheckpointStore::new();
        store.init(env.root(), "s", &env).await.unwrap();
        let err = store
            .restore("s", &env, env.root(), Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));
        let err = store.restore("s", &env, env.root(), None).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Empty(_)));
    }
}
