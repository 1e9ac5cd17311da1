pub mod core;
pub mod registry;
pub mod spec;

pub use self::core::{Agent, AgentContext, AgentHandler, AgentOutput, Effect, FnHandler};
pub use registry::AgentRegistry;
pub use spec::AgentSpec;
