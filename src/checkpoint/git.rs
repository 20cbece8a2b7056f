//! 基于 git 的快照存储
//!
//! 每个会话一个侧仓库 `<store_dir>/<session>.git`（bare），以环境根为 work-tree；
//! 快照 = add -A + commit（元数据写入 trailer），id 为 commit hash，天然按父提交串成链；
//! bundle 为 `git bundle` 的原始字节；恢复 = read-tree -u --reset + clean。
//! 所有 git 命令都经由执行环境运行，因此容器 / 远程沙箱后端同样可用。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::checkpoint::{
    sanitize_session_id, shell_quote, CheckpointError, CheckpointMeta, CheckpointStore, Snapshot,
};
use crate::env::{CommandOutput, Environment};

const COMMITTER_NAME: &str = "waypoint";
const COMMITTER_EMAIL: &str = "waypoint@localhost";

/// git 侧仓库快照存储
#[derive(Debug, Clone)]
pub struct GitCheckpointStore {
    store_dir: PathBuf,
}

impl GitCheckpointStore {
    pub fn new(store_dir: impl AsRef<Path>) -> Self {
        Self {
            store_dir: store_dir.as_ref().to_path_buf(),
        }
    }

    pub fn git_dir(&self, session_id: &str) -> PathBuf {
        self.store_dir
            .join(format!("{}.git", sanitize_session_id(session_id)))
    }

    /// `git --git-dir=<gd> --work-tree=<root>` 前缀
    fn base(&self, session_id: &str, root: &str) -> Result<String, CheckpointError> {
        Ok(format!(
            "git --git-dir={} --work-tree={}",
            shell_quote(&self.git_dir(session_id).to_string_lossy())?,
            shell_quote(root)?
        ))
    }

    fn git_only(&self, session_id: &str) -> Result<String, CheckpointError> {
        Ok(format!(
            "git --git-dir={}",
            shell_quote(&self.git_dir(session_id).to_string_lossy())?
        ))
    }

    async fn run(
        env: &dyn Environment,
        step: &'static str,
        cmd: &str,
    ) -> Result<CommandOutput, CheckpointError> {
        let out = env.execute_command(cmd, None).await?;
        if !out.success() {
            return Err(CheckpointError::Command {
                step,
                detail: format!("exit {}: {}", out.exit_code, out.stderr.trim()),
            });
        }
        Ok(out)
    }

    fn commit_message(meta: &CheckpointMeta) -> String {
        let mut msg = format!("checkpoint: {}\n\nSession: {}", meta.reason, meta.session_id);
        if let Some(t) = &meta.tool_use_id {
            msg.push_str(&format!("\nTool-Use: {t}"));
        }
        if let Some(c) = &meta.host_commit {
            msg.push_str(&format!("\nHost-Commit: {c}"));
        }
        msg.push_str(&format!("\nTimestamp: {}", meta.timestamp.to_rfc3339()));
        msg
    }

    /// 侧存储目录位于环境根内时，把它加入侧仓库的 info/exclude，避免快照自身
    fn exclude_entry(&self, root: &str) -> Option<String> {
        let rel = self.store_dir.strip_prefix(root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        (!rel.is_empty()).then(|| format!("/{rel}/"))
    }
}

#[async_trait]
impl CheckpointStore for GitCheckpointStore {
    async fn init(&self, root: &str, session_id: &str, env: &dyn Environment) -> Result<(), CheckpointError> {
        let gd = shell_quote(&self.git_dir(session_id).to_string_lossy())?;
        let probe = format!(
            "if [ -d {gd}/objects ]; then echo existing; else git init -q --bare {gd} && echo created; fi"
        );
        let out = Self::run(env, "init", &probe).await?;
        if out.stdout.trim() == "existing" {
            tracing::debug!(session_id, "checkpoint history already initialized");
            return Ok(());
        }

        let git = self.git_only(session_id)?;
        let setup = format!(
            "{git} config user.name {COMMITTER_NAME} && {git} config user.email {COMMITTER_EMAIL} && {git} config core.autocrlf false"
        );
        Self::run(env, "configure", &setup).await?;
        if let Some(pattern) = self.exclude_entry(root) {
            let cmd = format!(
                "mkdir -p {gd}/info && printf '%s\\n' {} >> {gd}/info/exclude",
                shell_quote(&pattern)?
            );
            Self::run(env, "exclude", &cmd).await?;
        }
        tracing::info!(session_id, git_dir = %self.git_dir(session_id).display(), "checkpoint history initialized");
        Ok(())
    }

    async fn snapshot(
        &self,
        meta: &CheckpointMeta,
        env: &dyn Environment,
        root: &str,
    ) -> Result<Snapshot, CheckpointError> {
        let session_id = meta.session_id.as_str();
        let gd = self.git_dir(session_id);
        let exists = env
            .execute_command(&format!("[ -d {}/objects ]", shell_quote(&gd.to_string_lossy())?), None)
            .await?;
        if !exists.success() {
            return Err(CheckpointError::NotInitialized(session_id.to_string()));
        }

        let base = self.base(session_id, root)?;
        Self::run(env, "add", &format!("{base} add -A")).await?;
        let message = shell_quote(&Self::commit_message(meta))?;
        Self::run(
            env,
            "commit",
            &format!("{base} commit -q --allow-empty --no-verify -m {message}"),
        )
        .await?;
        let head = Self::run(env, "rev-parse", &format!("{base} rev-parse HEAD")).await?;
        let id = head.stdout.trim().to_string();

        let git = self.git_only(session_id)?;
        let bundle_out = Self::run(
            env,
            "bundle",
            &format!("{git} bundle create -q - HEAD | base64"),
        )
        .await?;
        let encoded: String = bundle_out
            .stdout
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bundle = STANDARD
            .decode(encoded)
            .map_err(|e| CheckpointError::Bundle(e.to_string()))?;
        if bundle.is_empty() {
            return Err(CheckpointError::Bundle("git bundle produced no data".into()));
        }

        tracing::info!(session_id, checkpoint_id = %id, reason = %meta.reason, bundle_bytes = bundle.len(), "checkpoint created");
        Ok(Snapshot { id, bundle })
    }

    async fn restore(
        &self,
        session_id: &str,
        env: &dyn Environment,
        root: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<String, CheckpointError> {
        let git = self.git_only(session_id)?;
        let target = checkpoint_id.unwrap_or("HEAD");
        let quoted = shell_quote(&format!("{target}^{{commit}}"))?;
        let resolved = env
            .execute_command(&format!("{git} rev-parse --verify -q {quoted}"), None)
            .await?;
        if !resolved.success() {
            return Err(match checkpoint_id {
                Some(id) => CheckpointError::NotFound {
                    session_id: session_id.to_string(),
                    id: id.to_string(),
                },
                None => CheckpointError::Empty(session_id.to_string()),
            });
        }
        let commit = resolved.stdout.trim().to_string();

        let base = self.base(session_id, root)?;
        // 先把当前文件全部纳入索引，read-tree -u 才会删除快照之后新建的文件
        Self::run(env, "add", &format!("{base} add -A")).await?;
        Self::run(
            env,
            "read-tree",
            &format!("{base} read-tree -u --reset {}", shell_quote(&commit)?),
        )
        .await?;
        Self::run(env, "clean", &format!("{base} clean -fdq")).await?;

        tracing::info!(session_id, checkpoint_id = %commit, "environment restored");
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_dir_is_keyed_by_session() {
        let store = GitCheckpointStore::new("/var/lib/waypoint");
        assert_eq!(
            store.git_dir("s-1"),
            PathBuf::from("/var/lib/waypoint/s-1.git")
        );
    }

    #[test]
    fn test_commit_message_carries_trailers() {
        let mut meta = CheckpointMeta::new("s-1", "edit_file");
        meta.tool_use_id = Some("toolu_9".into());
        meta.host_commit = Some("abc123".into());
        let msg = GitCheckpointStore::commit_message(&meta);
        assert!(msg.starts_with("checkpoint: edit_file\n\nSession: s-1"));
        assert!(msg.contains("Tool-Use: toolu_9"));
        assert!(msg.contains("Host-Commit: abc123"));
    }

    #[test]
    fn test_exclude_entry_only_inside_root() {
        let inside = GitCheckpointStore::new("/work/.waypoint/checkpoints");
        assert_eq!(
            inside.exclude_entry("/work").as_deref(),
            Some("/.waypoint/checkpoints/")
        );
        let outside = GitCheckpointStore::new("/var/lib/waypoint");
        assert_eq!(outside.exclude_entry("/work"), None);
    }
}
