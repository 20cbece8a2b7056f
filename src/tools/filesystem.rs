//! 文件工具：read_file / write_file / edit_file / list_dir / glob
//!
//! 全部经由执行环境完成，路径沙箱由后端负责；写与编辑由 checkpoint 装饰器在变更前快照。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env::{Encoding, Environment, GlobOptions, ReadOptions};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolCategory};

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileArgs {
    /// 相对环境根的文件路径
    path: String,
    /// 起始行（0 起）
    offset: Option<usize>,
    /// 读取行数
    limit: Option<usize>,
    /// utf8（默认）或 base64
    encoding: Option<String>,
}

/// 读取文件（可按行窗口）
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Supports a line window (offset/limit) and base64 encoding for binary files."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadFileArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;
        let options = ReadOptions {
            max_size: None,
            line_offset: args.offset,
            line_count: args.limit,
            encoding: Encoding::parse(args.encoding.as_deref()).map_err(|e| e.to_string())?,
        };
        let content = env
            .read_file(&args.path, &options)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!(content))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteFileArgs {
    path: String,
    content: String,
    /// utf8（默认）或 base64
    encoding: Option<String>,
}

/// 写入（覆盖）文件，必要时创建父目录
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace. Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<WriteFileArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Edit
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: WriteFileArgs = parse_args(self.name(), args)?;
        let encoding = Encoding::parse(args.encoding.as_deref()).map_err(|e| e.to_string())?;
        env.write_file(&args.path, &args.content, encoding)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "path": args.path, "bytes": args.content.len() }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EditFileArgs {
    path: String,
    /// 待替换文本，必须在文件中恰好出现一次
    search: String,
    replace: String,
}

/// 精确字符串替换
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of `search` with `replace` in a file. Fails if the text is missing or matches more than once."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<EditFileArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Edit
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: EditFileArgs = parse_args(self.name(), args)?;
        let outcome = env
            .edit_file(&args.path, &args.search, &args.replace, Encoding::Utf8)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": args.path,
            "original_content": outcome.original_content,
            "new_content": outcome.new_content,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListDirArgs {
    /// 目录路径，缺省为环境根
    #[serde(default)]
    path: String,
    #[serde(default)]
    show_hidden: bool,
    /// 是否返回文件大小
    #[serde(default)]
    details: bool,
}

/// 列目录
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a workspace directory."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ListDirArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: ListDirArgs = parse_args(self.name(), args)?;
        let entries = env
            .list(&args.path, args.show_hidden, args.details)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_value(entries).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GlobArgs {
    /// glob 模式，如 `src/**/*.rs`
    pattern: String,
    /// 搜索根（相对环境根）
    cwd: Option<String>,
    #[serde(default)]
    include_hidden: bool,
    #[serde(default)]
    files_only: bool,
    max_results: Option<usize>,
}

/// glob 匹配路径
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find workspace paths matching a glob pattern, e.g. `**/*.rs`."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<GlobArgs>()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, env: &dyn Environment, args: Value) -> Result<Value, String> {
        let args: GlobArgs = parse_args(self.name(), args)?;
        let options = GlobOptions {
            cwd: args.cwd,
            include_hidden: args.include_hidden,
            files_only: args.files_only,
            max_results: args.max_results,
        };
        let paths = env
            .glob(&args.pattern, &options)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!(paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    fn env() -> (tempfile::TempDir, LocalEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        (dir, env)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, env) = env();
        WriteFileTool
            .execute(&env, json!({"path": "src/a.txt", "content": "l1\nl2\nl3"}))
            .await
            .unwrap();
        let out = ReadFileTool
            .execute(&env, json!({"path": "src/a.txt", "offset": 1, "limit": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!("l2"));
    }

    #[tokio::test]
    async fn test_edit_reports_ambiguity() {
        let (_dir, env) = env();
        WriteFileTool
            .execute(&env, json!({"path": "a.txt", "content": "x x"}))
            .await
            .unwrap();
        let err = EditFileTool
            .execute(&env, json!({"path": "a.txt", "search": "x", "replace": "y"}))
            .await
            .unwrap_err();
        assert!(err.contains("matches 2 times"));

        let out = EditFileTool
            .execute(&env, json!({"path": "a.txt", "search": "x x", "replace": "y"}))
            .await
            .unwrap();
        assert_eq!(out["new_content"], "y");
    }

    #[tokio::test]
    async fn test_list_and_glob() {
        let (_dir, env) = env();
        WriteFileTool
            .execute(&env, json!({"path": "a/b.rs", "content": ""}))
            .await
            .unwrap();
        let listed = ListDirTool.execute(&env, json!({})).await.unwrap();
        assert_eq!(listed[0]["name"], "a");
        assert_eq!(listed[0]["is_dir"], true);
        let found = GlobTool
            .execute(&env, json!({"pattern": "**/*.rs"}))
            .await
            .unwrap();
        assert_eq!(found, json!(["a/b.rs"]));
    }

    #[tokio::test]
    async fn test_bad_args() {
        let (_dir, env) = env();
        let err = ReadFileTool.execute(&env, json!({})).await.unwrap_err();
        assert!(err.contains("read_file"));
    }
}
