//! Shell 工具：经由执行环境执行命令（超时由后端负责），拒绝明显破坏性的命令
//!
//! 执行前由 checkpoint 装饰器快照，因此命令造成的文件变更可以回滚。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env::Environment;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolCategory};

/// 禁止的子串：作用范围超出工作区、无法由快照恢复
const FORBIDDEN_SUBSTR: &[&str] = &[
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "rm -rf /",
    ":(){ :|:& };:",
];

#[derive(Debug, Deserialize, JsonSchema)]
struct ShellArgs {
    /// 要执行的 shell 命令
    command: String,
    /// 工作目录（相对环境根）
    cwd: Option<String>,
}

pub struct ShellTool;

impl ShellTool {
    fn check(command: &str) -> Result<(), String> {
        if command.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        let lower = command.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {forbidden}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return stdout, stderr and exit code."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ShellArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execute
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: ShellArgs = parse_args(self.name(), args)?;
        let command = args.command.trim();
        Self::check(command)?;

        tracing::info!(command = %command, "shell tool execute");
        let output = env
            .execute_command(command, args.cwd.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "Exit {}\nstderr: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        Ok(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
        }))
    }
}
