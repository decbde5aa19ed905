//! Peer transport mesh (design doc §4.1, §5).
//!
//! Each peer dials every other peer after a short settling delay and
//! tolerates connect/write failures with a lazy reconnect loop rather than a
//! single attempt at boot. Inbound connections (whether from a peer's own
//! dial-out or accepted here) are read by a detached reader task that
//! forwards decoded envelopes onto the shared incoming queue; the envelope's
//! own `source`/`destination` fields carry routing identity; the physical
//! connection they arrived on is otherwise anonymous.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::sleep;

use crate::raft::{Envelope, Event, MsgId, PeerMsg};
use crate::server::ReplicaId;
use crate::utils::{
    pf_debug, pf_error, pf_trace, pf_warn, recv_frame, send_frame, LastContact, RaftError,
};

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Pending synchronous-response waiters, keyed by the request's [`MsgId`].
/// Shared between the engine (which inserts a waiter before sending a
/// request it wants to correlate a reply to) and the transport's reader
/// tasks (which resolve it directly, per design doc §9's "per-uuid waiter
/// table" redesign -- this is what lets a `VoteResponse`/
/// `AppendEntriesResponse` reach its waiter even while the dispatcher itself
/// is busy synchronously awaiting an election or replication round, rather
/// than needing to be the one pumping the incoming queue).
pub type WaiterTable = Arc<Mutex<HashMap<MsgId, oneshot::Sender<PeerMsg>>>>;

pub struct TransportHub {
    id: ReplicaId,
    peer_txs: HashMap<ReplicaId, mpsc::UnboundedSender<Envelope>>,
    next_msg_id: AtomicU64,
}

impl TransportHub {
    /// Binds the inbound listener, spawns its accept loop, and spawns one
    /// connection task per peer that dials out after `settle_delay`. Every
    /// inbound `AppendEntriesRequest`, from whichever connection it arrives
    /// on, touches `last_contact` before being forwarded as an [`Event`]
    /// (design doc §4.2, §5 -- this write happens on the reader task, not
    /// the dispatcher).
    pub async fn new_and_setup(
        id: ReplicaId,
        bind_addr: SocketAddr,
        peers: &HashMap<ReplicaId, SocketAddr>,
        settle_delay: Duration,
        incoming_tx: mpsc::UnboundedSender<Event>,
        waiters: WaiterTable,
        last_contact: Arc<LastContact>,
    ) -> Result<Self, RaftError> {
        let listener = TcpListener::bind(bind_addr).await?;
        {
            let incoming_tx = incoming_tx.clone();
            let waiters = waiters.clone();
            let last_contact = last_contact.clone();
            tokio::spawn(Self::accept_loop(listener, incoming_tx, waiters, last_contact));
        }

        let mut peer_txs = HashMap::new();
        for (&peer_id, &addr) in peers.iter() {
            if peer_id == id {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            peer_txs.insert(peer_id, tx);
            let incoming_tx = incoming_tx.clone();
            let waiters = waiters.clone();
            let last_contact = last_contact.clone();
            tokio::spawn(async move {
                sleep(settle_delay).await;
                Self::connection_loop(peer_id, addr, rx, incoming_tx, waiters, last_contact).await;
            });
        }

        Ok(TransportHub {
            id,
            peer_txs,
            next_msg_id: AtomicU64::new(0),
        })
    }

    pub fn fresh_msg_id(&self) -> MsgId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueues `body` for delivery to `destination` and returns the id
    /// assigned to the envelope. Delivery is best-effort and fire-and-forget
    /// (design doc §4.1) -- a closed or unknown destination queue is logged
    /// and dropped, never an error the caller must handle.
    pub fn send(
        &self,
        destination: ReplicaId,
        ref_id: Option<MsgId>,
        body: PeerMsg,
    ) -> MsgId {
        let id = self.fresh_msg_id();
        let envelope = Envelope {
            id,
            source: self.id,
            destination,
            ref_id,
            body,
        };
        match self.peer_txs.get(&destination) {
            Some(tx) if tx.send(envelope).is_ok() => {}
            _ => pf_warn!("could not enqueue message to peer {}", destination),
        }
        id
    }

    async fn accept_loop(
        listener: TcpListener,
        incoming_tx: mpsc::UnboundedSender<Event>,
        waiters: WaiterTable,
        last_contact: Arc<LastContact>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let incoming_tx = incoming_tx.clone();
                    let waiters = waiters.clone();
                    let last_contact = last_contact.clone();
                    tokio::spawn(Self::read_frames(stream, incoming_tx, waiters, last_contact));
                }
                Err(e) => pf_error!("peer listener accept error: {}", e),
            }
        }
    }

    /// Dials `addr`, spawns a detached reader for the connection, then
    /// drains `rx` into the write half until a write fails, at which point
    /// it loops back to reconnect.
    async fn connection_loop(
        peer_id: ReplicaId,
        addr: SocketAddr,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        incoming_tx: mpsc::UnboundedSender<Event>,
        waiters: WaiterTable,
        last_contact: Arc<LastContact>,
    ) {
        'reconnect: loop {
            let stream = match TcpStream::connect(addr).await {
                Ok(s) => s,
                Err(e) => {
                    pf_warn!("connect to peer {} failed: {}", peer_id, e);
                    sleep(RECONNECT_BACKOFF).await;
                    continue 'reconnect;
                }
            };
            pf_debug!("connected to peer {}", peer_id);
            let (read_half, mut write_half) = split(stream);
            tokio::spawn(Self::read_frames(
                read_half,
                incoming_tx.clone(),
                waiters.clone(),
                last_contact.clone(),
            ));

            while let Some(envelope) = rx.recv().await {
                let bytes = match bincode::serialize(&envelope) {
                    Ok(b) => b,
                    Err(e) => {
                        pf_error!("failed to encode outgoing envelope: {}", e);
                        continue;
                    }
                };
                if let Err(e) = send_frame(&mut write_half, &bytes).await {
                    pf_warn!(
                        "write to peer {} failed: {}, reconnecting",
                        peer_id,
                        e
                    );
                    sleep(RECONNECT_BACKOFF).await;
                    continue 'reconnect;
                }
            }
            // outgoing queue dropped: no more messages will ever be sent.
            return;
        }
    }

    /// Reads frames off `reader` until EOF or a framing error, decoding each
    /// as a bincode-serialized `Envelope`. A response envelope
    /// (`VoteResponse`/`AppendEntriesResponse`) whose `ref_id` matches a
    /// registered waiter is handed straight to that waiter and never touches
    /// the dispatcher's incoming queue at all; everything else (requests,
    /// and any response that arrived too late to find its waiter) is
    /// forwarded as an [`Event::Peer`].
    async fn read_frames<R: AsyncRead + Unpin>(
        mut reader: R,
        incoming_tx: mpsc::UnboundedSender<Event>,
        waiters: WaiterTable,
        last_contact: Arc<LastContact>,
    ) {
        loop {
            let bytes = match recv_frame(&mut reader).await {
                Ok(b) => b,
                Err(_) => return, // connection closed or malformed; drop it
            };
            let envelope = match bincode::deserialize::<Envelope>(&bytes) {
                Ok(e) => e,
                Err(e) => {
                    pf_error!("failed to decode incoming envelope: {}", e);
                    continue;
                }
            };

            if matches!(envelope.body, PeerMsg::AppendEntriesRequest { .. }) {
                last_contact.touch().await;
            }

            let is_response = matches!(
                envelope.body,
                PeerMsg::VoteResponse { .. } | PeerMsg::AppendEntriesResponse { .. }
            );
            if is_response {
                if let Some(ref_id) = envelope.ref_id {
                    if let Some(waiter) = waiters.lock().await.remove(&ref_id) {
                        let _ = waiter.send(envelope.body);
                        continue;
                    }
                }
                pf_trace!(
                    "{} from peer {} arrived with no matching waiter, dropping",
                    envelope.body.kind(),
                    envelope.source
                );
                continue;
            }

            if incoming_tx.send(Event::Peer(envelope)).is_err() {
                return;
            }
        }
    }
}
