use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::serial::SerialHandle;

/// Chunk size for reads off the dockserver socket.
const READ_BUFFER: usize = 256;

/// Why a relay stopped. The session decides what each reason means:
/// serial-side reasons are routine, socket-side reasons are fatal for
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The serial side reached end of stream, or the handle went away.
    SerialClosed,

    /// The serial side failed.
    SerialError,

    /// The socket peer closed the connection.
    TcpClosed,

    /// The socket failed.
    TcpError,
}

/// Relay bytes between an open serial device and a dockserver socket
/// until either side closes or errors.
///
/// The two directions run concurrently; whichever stops first decides
/// the [`TerminationReason`]. Neither transport is shut down in here —
/// the caller drops both once it has decided what the termination means.
/// Buffering is bounded by the serial handle's channels and the read
/// buffer, so a slow peer throttles the opposite direction instead of
/// growing a queue.
pub async fn run<S>(serial: &mut SerialHandle, socket: S) -> TerminationReason
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut socket_rx, mut socket_tx) = tokio::io::split(socket);

    let from_wire = &mut serial.from_wire;
    let to_wire = serial.to_wire.clone();

    let serial_to_socket = async move {
        loop {
            match from_wire.recv().await {
                Some(Ok(bytes)) => {
                    trace!("serial -> dockserver: {} bytes", bytes.len());
                    if socket_tx.write_all(&bytes).await.is_err() {
                        break TerminationReason::TcpError;
                    }
                }
                Some(Err(e)) => {
                    debug!(%e, "Serial side failed");
                    break TerminationReason::SerialError;
                }
                None => break TerminationReason::SerialClosed,
            }
        }
    };

    let socket_to_serial = async move {
        let mut buf = [0u8; READ_BUFFER];
        loop {
            match socket_rx.read(&mut buf).await {
                Ok(0) => break TerminationReason::TcpClosed,
                Ok(n) => {
                    trace!("dockserver -> serial: {n} bytes");
                    if to_wire.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break TerminationReason::SerialClosed;
                    }
                }
                Err(e) => {
                    debug!(%e, "Socket read failed");
                    break TerminationReason::TcpError;
                }
            }
        }
    };

    let reason = tokio::select! {
        reason = serial_to_socket => reason,
        reason = socket_to_serial => reason,
    };

    debug!(?reason, "Relay done");
    reason
}
