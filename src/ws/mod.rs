pub mod heartbeat;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod session;

pub use heartbeat::HeartbeatMonitor;
pub use registry::ConnectionRegistry;
pub use resolver::ConversationResolver;
pub use router::MessageRouter;
pub use session::{CloseReason, Session};
