//! Stdin/stdout bridge between the server and plugin executables.
//!
//! This module provides the wire protocol and codec for communication with
//! a plugin subprocess.
//!
//! # Architecture
//!
//! - **protocol**: Message types (ExecRequest, ExecResponse, ExecError)
//! - **codec**: JSON document codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
