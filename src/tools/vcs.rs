//! VCS 状态工具：当前分支、commit 与改动文件列表

use async_trait::async_trait;
use serde_json::Value;

use crate::env::Environment;
use crate::tools::{Tool, ToolCategory};

pub struct VcsStatusTool;

#[async_trait]
impl Tool for VcsStatusTool {
    fn name(&self) -> &str {
        "vcs_status"
    }

    fn description(&self) -> &str {
        "Show the workspace's version-control state: whether it is a repository, current commit, branch, and staged/modified/untracked files."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, env: &dyn Environment, _args: Value) -> Result<Value, String> {
        let state = env.vcs_state().await.map_err(|e| e.to_string())?;
        serde_json::to_value(state).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    #[tokio::test]
    async fn test_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let out = VcsStatusTool
            .execute(&env, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out["is_repo"], false);
    }
}
