pub mod http;
pub mod server;
pub mod tools;
pub mod transport;

pub use server::McpServer;
pub use tools::{list_tools, Dispatcher, ToolResult};
