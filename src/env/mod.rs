//! 执行环境能力接口（Environment Facade）
//!
//! 编排内核只依赖这一个 trait：读写/编辑文件、执行命令、列目录、glob、查询 VCS 状态。
//! 每种后端（本地进程、容器、远程沙箱）各实现一次；写文件、编辑文件、执行命令三个变更操作
//! 由 [`crate::checkpoint::CheckpointingEnvironment`] 拦截，先快照再委托。

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalEnvironment;

/// 执行环境错误；编辑失败区分「未找到」与「匹配多处」
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Search text not found in {path}")]
    PatternNotFound { path: String },

    #[error("Search text matches {count} times in {path}; it must match exactly once")]
    PatternAmbiguous { path: String, count: usize },

    #[error("File too large: {path} ({size} bytes, max {max})")]
    TooLarge { path: String, size: u64, max: u64 },

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(String),

    /// 快照失败时变更操作不会执行
    #[error("Checkpoint failed, operation not performed: {0}")]
    Checkpoint(String),
}

impl From<std::io::Error> for EnvError {
    fn from(e: std::io::Error) -> Self {
        EnvError::Io(e.to_string())
    }
}

/// 文件内容编码
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

impl Encoding {
    /// 解析工具参数里的编码名，缺省为 utf8
    pub fn parse(raw: Option<&str>) -> Result<Self, EnvError> {
        match raw.map(|s| s.trim().to_lowercase()) {
            None => Ok(Encoding::Utf8),
            Some(s) if s.is_empty() || s == "utf8" || s == "utf-8" => Ok(Encoding::Utf8),
            Some(s) if s == "base64" => Ok(Encoding::Base64),
            Some(other) => Err(EnvError::UnsupportedEncoding(other)),
        }
    }
}

/// 命令执行结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// read_file 选项：大小上限与行窗口
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    pub max_size: Option<u64>,
    /// 起始行（0 起）
    pub line_offset: Option<usize>,
    pub line_count: Option<usize>,
    pub encoding: Encoding,
}

/// edit_file 成功后返回编辑前后的完整内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub original_content: String,
    pub new_content: String,
}

/// 目录项
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
    /// 仅 details 为 true 时填充
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// glob 选项
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobOptions {
    /// 搜索根（相对环境根），缺省为环境根
    pub cwd: Option<String>,
    /// 是否包含隐藏文件（以 . 开头的路径段）
    #[serde(default)]
    pub include_hidden: bool,
    /// 仅返回文件
    #[serde(default)]
    pub files_only: bool,
    pub max_results: Option<usize>,
}

/// 环境自身的 VCS 状态
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsState {
    pub is_repo: bool,
    pub commit_id: Option<String>,
    pub branch: Option<String>,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

/// 执行环境能力集合
#[async_trait]
pub trait Environment: Send + Sync {
    /// 环境根目录（checkpoint 以此为快照范围）
    fn root(&self) -> &str;

    async fn execute_command(&self, cmd: &str, cwd: Option<&str>) -> Result<CommandOutput, EnvError>;

    async fn read_file(&self, path: &str, options: &ReadOptions) -> Result<String, EnvError>;

    async fn write_file(&self, path: &str, content: &str, encoding: Encoding) -> Result<(), EnvError>;

    /// 将唯一一处 search 替换为 replace；0 处返回 PatternNotFound，多处返回 PatternAmbiguous
    async fn edit_file(
        &self,
        path: &str,
        search: &str,
        replace: &str,
        encoding: Encoding,
    ) -> Result<EditOutcome, EnvError>;

    async fn list(&self, path: &str, show_hidden: bool, details: bool) -> Result<Vec<ListEntry>, EnvError>;

    async fn glob(&self, pattern: &str, options: &GlobOptions) -> Result<Vec<String>, EnvError>;

    async fn vcs_state(&self) -> Result<VcsState, EnvError>;
}

/// 单处替换的纯函数实现，供各后端复用
pub fn replace_unique(path: &str, original: &str, search: &str, replace: &str) -> Result<String, EnvError> {
    if search.is_empty() {
        return Err(EnvError::PatternNotFound {
            path: path.to_string(),
        });
    }
    match original.matches(search).count() {
        0 => Err(EnvError::PatternNotFound {
            path: path.to_string(),
        }),
        1 => Ok(original.replacen(search, replace, 1)),
        count => Err(EnvError::PatternAmbiguous {
            path: path.to_string(),
            count,
        }),
    }
}
