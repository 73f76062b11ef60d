pub mod agent_client;
pub mod builtin;
pub mod invoker;
pub mod rate_limit;
pub mod registry;

pub use agent_client::HttpAgentClient;
pub use invoker::ToolInvoker;
pub use rate_limit::RateLimiter;
pub use registry::ToolRegistry;
