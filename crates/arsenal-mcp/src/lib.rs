//! MCP bridge exposing the sales arsenal, the lead store and generic table
//! access as tools, over stdio or HTTP.

pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::{BridgeConfig, Transport};
pub use error::{ConfigError, ToolError};
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use registry::{ToolKind, ToolRegistry};
pub use server::McpServer;
pub use session::SessionTable;
pub use tools::ToolContext;
