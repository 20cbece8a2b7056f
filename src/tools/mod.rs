//! 工具层：Tool trait、注册表、执行器与内置工具

pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod vcs;

pub use executor::{ToolExecutor, ToolOutcome};
pub use filesystem::{EditFileTool, GlobTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use registry::{Tool, ToolCategory, ToolRegistry, ToolSpec};
pub use shell::ShellTool;
pub use vcs::VcsStatusTool;
