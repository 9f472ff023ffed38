//! Concrete [`Transport`](crate::eip1193::Transport) implementations.
//!
//! - [`MemoryProvider`]: scriptable in-process wallet, for tests and demos
//! - [`HttpProvider`]: a JSON-RPC node over HTTP

mod http;
mod memory;

pub use http::HttpProvider;
pub use memory::{MemoryProvider, RequestHandler};
