//! MCP Dispatcher: routes `initialize`/`tools/list`/`tools/call` over the
//! JSON-RPC envelope, sequencing site authorization, confirmation
//! round-trips, and tool execution (`spec.md` §4.J).

mod args;
mod dispatcher;
mod sinks;
mod tools;
mod wire;

pub use dispatcher::Dispatcher;
pub use sinks::AuditRecord;
pub use sinks::AuditSink;
pub use sinks::ConsoleRecord;
pub use sinks::ConsoleSink;
pub use tools::TOOL_NAMES;
pub use tools::tool_descriptors;
pub use tools::tool_needs_confirmation;
pub use wire::JsonRpcRequest;
pub use wire::JsonRpcResponse;
pub use wire::McpToolCallResult;
