//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAYPOINT__*` 覆盖（双下划线表示嵌套，如 `WAYPOINT__CHECKPOINT__BACKEND=memory`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::RetryConfig;
use crate::permission::PermissionPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub environment: EnvironmentSection,
    pub checkpoint: CheckpointSection,
    pub permissions: PermissionPolicy,
    pub model: RetryConfig,
}

/// [agent] 段：单次查询的迭代上限、事件总线容量、中止回复
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_abort_message")]
    pub abort_message: String,
}

fn default_max_iterations() -> usize {
    24
}

fn default_event_capacity() -> usize {
    128
}

fn default_abort_message() -> String {
    "Operation aborted".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            event_capacity: default_event_capacity(),
            abort_message: default_abort_message(),
        }
    }
}

/// [environment] 段：本地执行环境
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentSection {
    /// 沙箱根目录，未设置时用 ./workspace
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_max_read_bytes() -> u64 {
    1024 * 1024
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            command_timeout_secs: default_command_timeout_secs(),
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

/// 快照后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Git,
    Memory,
}

/// [checkpoint] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckpointSection {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// 侧存储目录，未设置时用 ./.waypoint/checkpoints
    pub store_dir: Option<PathBuf>,
}

impl CheckpointSection {
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".waypoint/checkpoints"))
    }
}

/// 从 config 目录加载配置，环境变量 WAYPOINT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAYPOINT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAYPOINT")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("permissions.fast_mode_categories")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 24);
        assert_eq!(cfg.agent.abort_message, "Operation aborted");
        assert_eq!(cfg.environment.command_timeout_secs, 120);
        assert_eq!(cfg.checkpoint.backend, CheckpointBackend::Git);
        assert_eq!(cfg.model.max_attempts, 4);
        assert!(!cfg.permissions.danger_mode);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[agent]
max_iterations = 5

[checkpoint]
backend = "memory"

[permissions]
fast_mode = true
always_ask = ["shell"]

[model]
base_delay_ms = 10
"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.agent.event_capacity, 128);
        assert_eq!(cfg.checkpoint.backend, CheckpointBackend::Memory);
        assert!(cfg.permissions.fast_mode);
        assert!(cfg.permissions.always_ask.contains("shell"));
        assert_eq!(cfg.model.base_delay_ms, 10);
        assert_eq!(cfg.model.max_attempts, 4);
    }
}
