//! A single request/reply round trip against one replica's external API
//! (design doc §4.7, §6).
//!
//! Mirrors the wire usage of [`crate::server::external_api`]: connect, send
//! one length-prefixed command line, read back one length-prefixed reply
//! line, close. No connection pooling or retry lives here -- that is
//! [`super::endpoint`]'s job, one layer up.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::utils::{recv_frame, send_frame, RaftError};

/// Sends `command` to the replica at `addr` and returns its raw reply line
/// (whatever [`crate::server::ApiReply::to_wire_string`] produced).
pub async fn send_command(addr: SocketAddr, command: &str) -> Result<String, RaftError> {
    let mut stream = TcpStream::connect(addr).await?;
    send_frame(&mut stream, command.as_bytes()).await?;
    let bytes = recv_frame(&mut stream).await?;
    String::from_utf8(bytes).map_err(|e| RaftError::Decode(format!("non-UTF8 reply: {}", e)))
}
