//! Control plane for a running proxy.
//!
//! The proxy listens on a Unix domain socket; the `stats`, `export` and
//! `clear` subcommands connect to it to query or manage the in-memory audit
//! log without restarting the proxy.

pub mod protocol;
pub mod socket;

pub use protocol::{ControlRequest, ControlResponse};
pub use socket::{
    ControlClient, ControlServer, MAX_MESSAGE_SIZE, SocketError, SocketResult,
    default_socket_path, handle_request,
};
