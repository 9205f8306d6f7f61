//! HTTP/JSON transport: one `POST` route per CPI method.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, routes};
pub use server::{DEFAULT_SOCKET_PATH, ListenAddr, ServerConfig, serve};
