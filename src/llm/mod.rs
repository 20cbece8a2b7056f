//! 模型层：客户端抽象、重试包装与 Mock 实现

pub mod mock;
pub mod retry;
pub mod traits;

pub use mock::{EchoModel, Script, ScriptedModel};
pub use retry::{RetryConfig, RetryingModelClient};
pub use traits::{ModelClient, ModelDecision, ModelError, ModelRequest, ToolCall};
