//! 会话 Transcript：消息模型、配对不变式与回滚

pub mod message;
#[allow(clippy::module_inception)]
pub mod transcript;

pub use message::{ContentBlock, Message, Role};
pub use transcript::{Transcript, TranscriptError};
