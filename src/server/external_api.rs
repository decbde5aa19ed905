//! Client-facing listener (design doc §4.7, §6).
//!
//! One TCP connection carries exactly one request/reply round trip: accept,
//! read a single framed line, hand it to the dispatcher, write back whatever
//! comes out of the reply channel, close. One-shot-per-command socket usage
//! rather than a persistent multiplexed session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::raft::{ClientOutcome, Event};
use crate::server::ApiReply;
use crate::utils::{pf_debug, pf_error, pf_warn, recv_frame, send_frame, RaftError};

/// How long the external API waits for a submitted command to be applied
/// before giving up on that connection (design doc §5 -- "single-response
/// awaits (~2s)").
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ExternalApi;

impl ExternalApi {
    /// Binds `bind_addr` and spawns the accept loop; each accepted
    /// connection is handled on its own task so a slow or stuck client
    /// cannot block others.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
        incoming_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<(), RaftError> {
        let listener = TcpListener::bind(bind_addr).await?;
        tokio::spawn(Self::accept_loop(listener, incoming_tx));
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        incoming_tx: mpsc::UnboundedSender<Event>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let incoming_tx = incoming_tx.clone();
                    tokio::spawn(Self::serve_one(stream, incoming_tx));
                }
                Err(e) => pf_error!("client listener accept error: {}", e),
            }
        }
    }

    async fn serve_one(mut stream: TcpStream, incoming_tx: mpsc::UnboundedSender<Event>) {
        let bytes = match recv_frame(&mut stream).await {
            Ok(b) => b,
            Err(e) => {
                pf_warn!("client connection closed before a full frame: {}", e);
                return;
            }
        };
        let command = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => {
                pf_warn!("client sent a non-UTF8 command line");
                return;
            }
        };

        let (respond_to, reply_rx) = oneshot::channel();
        if incoming_tx
            .send(Event::ClientAppend {
                command,
                respond_to,
            })
            .is_err()
        {
            pf_error!("dispatcher incoming queue is closed");
            return;
        }

        let reply = match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(ClientOutcome::Applied(result))) => ApiReply::Result(result),
            Ok(Ok(ClientOutcome::NotLeader { leader })) => ApiReply::NotLeader { leader },
            Ok(Err(_)) => {
                pf_warn!("reply channel dropped before command was applied");
                ApiReply::Result("Request could not be executed".to_string())
            }
            Err(_) => {
                pf_debug!("timed out waiting for command to be applied");
                ApiReply::Result("Request could not be executed".to_string())
            }
        };

        let wire = reply.to_wire_string();
        if let Err(e) = send_frame(&mut stream, wire.as_bytes()).await {
            pf_warn!("failed to write reply to client: {}", e);
        }
    }
}
