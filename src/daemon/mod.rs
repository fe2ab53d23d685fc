//! Daemon surface: a JSON-lines protocol served over a Unix socket.
//!
//! Clients send one [`protocol::Request`] per line and read one
//! [`protocol::Response`] per line on the same connection.

pub mod protocol;
#[cfg(unix)]
pub mod server;
