//! Transport layer for cpi-bridge.
//!
//! Currently provides HTTP/JSON transport via axum, over TCP or a Unix
//! domain socket.

pub mod http;

pub use http::{ListenAddr, ServerConfig, serve};
