//! 核心编排层：状态机、会话上下文、主循环、回滚协调、事件与错误

pub mod driver;
pub mod error;
pub mod events;
pub mod rollback;
pub mod session;
pub mod state;

pub use driver::{Driver, RunOutcome};
pub use error::AgentError;
pub use events::{AgentEvent, EventBus};
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use session::{Session, SessionControl, SessionHandle};
pub use state::{InvalidTransition, LoopEvent, LoopState};
