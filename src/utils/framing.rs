//! Length-prefixed frame I/O shared by the peer transport mesh and the
//! client front-end (design doc §4.1, §6).
//!
//! Every frame on the wire -- whether it carries a bincode-serialized
//! `PeerMsg` or a raw UTF-8 client command line -- is a fixed 10-byte ASCII
//! decimal length (space-padded, right-justified) followed by exactly that
//! many bytes of payload. Partial reads (EOF mid-frame) are treated as fatal
//! for that connection; callers are expected to close and, for peer
//! connections, reconnect.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::RaftError;

/// Width, in bytes, of the ASCII decimal length prefix.
pub const FRAME_LEN_WIDTH: usize = 10;

/// Writes one length-prefixed frame, guaranteeing a complete write of both
/// the length prefix and the payload.
pub async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), RaftError> {
    if payload.len() >= 10usize.pow(FRAME_LEN_WIDTH as u32 - 1) {
        return Err(RaftError::msg(format!(
            "payload of {} bytes does not fit in a {}-digit length prefix",
            payload.len(),
            FRAME_LEN_WIDTH
        )));
    }
    let header = format!("{:>width$}", payload.len(), width = FRAME_LEN_WIDTH);
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame. Returns `Err` if the connection closes
/// before a complete frame (header or body) has arrived.
pub async fn recv_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, RaftError> {
    let mut header = [0u8; FRAME_LEN_WIDTH];
    reader.read_exact(&mut header).await.map_err(|e| {
        RaftError::Decode(format!("incomplete frame length header: {}", e))
    })?;
    let len_str = std::str::from_utf8(&header)
        .map_err(|e| RaftError::Decode(format!("non-UTF8 length header: {}", e)))?;
    let len: usize = len_str
        .trim()
        .parse()
        .map_err(|e| RaftError::Decode(format!("malformed length header: {}", e)))?;

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| RaftError::Decode(format!("incomplete frame body: {}", e)))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trip() {
        let (mut a, mut b) = duplex(1024);
        send_frame(&mut a, b"hello raft").await.unwrap();
        let got = recv_frame(&mut b).await.unwrap();
        assert_eq!(got, b"hello raft");
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        let (mut a, mut b) = duplex(64);
        send_frame(&mut a, b"").await.unwrap();
        let got = recv_frame(&mut b).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn truncated_connection_is_an_error() {
        let (mut a, b) = duplex(64);
        send_frame(&mut a, b"partial").await.unwrap();
        drop(a);
        let mut b = b;
        // consume the valid frame first
        let got = recv_frame(&mut b).await.unwrap();
        assert_eq!(got, b"partial");
        // then the connection is closed with no further frame
        assert!(recv_frame(&mut b).await.is_err());
    }
}
