//! Per-peer connection state and tasks.
//!
//! Each live connection is a reader task and a writer task over the
//! split TCP stream. The writer drains a command channel; the reader
//! reassembles frames and hands them to the receive queue. Either side
//! failing detaches the peer.

use bytes::Bytes;
use emp_core::{WireDecode, FRAME_HEADER_LEN};
use emp_proto::{Frame, Header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Commands for a peer's writer task.
#[derive(Debug)]
pub enum ConnCmd {
    /// Write a serialized frame to the peer
    Send(Bytes),
    /// Drop the connection
    Close,
}

/// Handle to a live peer connection.
#[derive(Debug)]
pub struct PeerHandle {
    /// Writer command channel
    pub cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    /// Abort handle for the reader task
    pub reader: AbortHandle,
}

impl PeerHandle {
    /// Queues a serialized frame for the peer.
    pub fn send(&self, data: Bytes) -> bool {
        self.cmd_tx.send(ConnCmd::Send(data)).is_ok()
    }

    /// Tears the connection down: the writer drops its half and the
    /// reader task is aborted.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Close);
        self.reader.abort();
    }
}

/// Writer task: drains the command channel onto the socket.
pub(crate) async fn write_loop(mut half: OwnedWriteHalf, mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>, key: String) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ConnCmd::Send(data) => {
                if let Err(e) = half.write_all(&data).await {
                    warn!(peer = %key, error = %e, "Write failed, detaching peer");
                    break;
                }
            }
            ConnCmd::Close => break,
        }
    }
    debug!(peer = %key, "Writer stopped");
}

/// Reader task: reassembles header-prefixed frames and pushes them onto
/// the receive queue tagged with the peer key.
pub(crate) async fn read_loop(
    mut half: OwnedReadHalf,
    key: String,
    max_frame_len: usize,
    recv_tx: mpsc::UnboundedSender<Frame>,
) {
    let mut header_buf = [0u8; FRAME_HEADER_LEN];
    loop {
        if let Err(e) = half.read_exact(&mut header_buf).await {
            debug!(peer = %key, error = %e, "Connection closed");
            break;
        }
        let header = match Header::from_bytes(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(peer = %key, error = %e, "Unreadable frame header, detaching peer");
                break;
            }
        };
        if header.length as usize > max_frame_len {
            warn!(peer = %key, length = header.length, "Oversized frame, detaching peer");
            break;
        }

        let mut payload = vec![0u8; header.length as usize];
        if let Err(e) = half.read_exact(&mut payload).await {
            debug!(peer = %key, error = %e, "Connection closed mid-frame");
            break;
        }

        let frame = Frame {
            header,
            payload: Bytes::from(payload),
            peer: key.clone(),
        };
        if recv_tx.send(frame).is_err() {
            // Engine is gone; nothing left to deliver to.
            break;
        }
    }
}
