use std::time::Duration;

use bytes::Bytes;
use serialport::SerialPort;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, watch},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info_span, trace, warn, Instrument};

use super::{error::SerialError, SerialHandle, SerialOpen, BYTE_CHANNEL_CAPACITY};
use crate::{
    device::{CarrierMode, DeviceConfig},
    error::Error,
};

/// Chunk size for reads off the wire.
const READ_BUFFER: usize = 256;

/// The carrier-detect line has no change notification in the serialport
/// API, so monitored ports poll it at this interval.
const CARRIER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Opens real serial devices via tokio-serial.
///
/// Ports are opened 8N1 without flow control; the glider side dictates
/// the baud rate.
#[derive(Debug, Clone)]
pub struct NativeSerial {
    baud: u32,
}

impl Default for NativeSerial {
    fn default() -> Self {
        Self { baud: 115_200 }
    }
}

impl NativeSerial {
    /// Use a non-default baud rate.
    pub fn with_baud(baud: u32) -> Self {
        Self { baud }
    }
}

impl SerialOpen for NativeSerial {
    fn open(&self, device: &DeviceConfig) -> Result<SerialHandle, Error> {
        let serial_open = |reason: String| Error::SerialOpen {
            device: device.path.clone(),
            reason,
        };

        let mut stream = tokio_serial::new(device.path.as_str(), self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| serial_open(e.to_string()))?;

        debug!(device = %device.path, baud = %self.baud, mode = %device.mode, "Opened serial port");

        // Reads and writes happen on split halves, so the carrier line
        // is polled through a second handle onto the same tty.
        let carrier_line = match device.mode {
            CarrierMode::Monitored => Some(
                stream
                    .try_clone()
                    .map_err(|e| serial_open(format!("carrier line unavailable: {e}")))?,
            ),
            CarrierMode::Direct => None,
        };

        // Seed the carrier state so sessions see the line as it is right
        // now, not only the next change.
        let initially_up = match device.mode {
            CarrierMode::Monitored => read_carrier(&mut stream),
            CarrierMode::Direct => true,
        };

        let (carrier_tx, carrier_rx) = watch::channel(initially_up);
        let (from_wire_tx, from_wire_rx) = mpsc::channel(BYTE_CHANNEL_CAPACITY);
        let (to_wire_tx, to_wire_rx) = mpsc::channel(BYTE_CHANNEL_CAPACITY);

        let (reader, writer) = tokio::io::split(stream);

        let span = info_span!("port", device = %device.path);
        let task = tokio::spawn(
            port_task(
                reader,
                writer,
                carrier_line,
                from_wire_tx,
                to_wire_rx,
                carrier_tx,
            )
            .instrument(span),
        );

        Ok(SerialHandle::new(
            device.path.clone(),
            from_wire_rx,
            to_wire_tx,
            carrier_rx,
            Some(task),
        ))
    }
}

fn read_carrier(port: &mut dyn SerialPort) -> bool {
    match port.read_carrier_detect() {
        Ok(up) => up,
        Err(e) => {
            warn!(%e, "Carrier line unreadable, treating as carrier down");
            false
        }
    }
}

/// Owns the open port for its lifetime.
///
/// Shovels bytes between the tty and the handle's channels and keeps
/// the carrier watch up to date. Ends on the first serial error, on end
/// of stream, or when the handle is dropped.
async fn port_task(
    mut reader: ReadHalf<SerialStream>,
    mut writer: WriteHalf<SerialStream>,
    mut carrier_line: Option<Box<dyn SerialPort>>,
    from_wire: mpsc::Sender<Result<Bytes, SerialError>>,
    mut to_wire: mpsc::Receiver<Bytes>,
    carrier: watch::Sender<bool>,
) {
    let mut poll = tokio::time::interval(CARRIER_POLL_INTERVAL);
    let mut buf = [0u8; READ_BUFFER];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Serial port reached end of stream");
                    break;
                }
                Ok(n) => {
                    trace!("{n} bytes from wire");
                    if from_wire.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%e, "Serial read failed");
                    let _ = from_wire.send(Err(e.into())).await;
                    break;
                }
            },
            outgoing = to_wire.recv() => match outgoing {
                Some(bytes) => {
                    trace!("{} bytes to wire", bytes.len());
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!(%e, "Serial write failed");
                        let _ = from_wire.send(Err(e.into())).await;
                        break;
                    }
                }
                // Handle dropped.
                None => break,
            },
            _ = poll.tick(), if carrier_line.is_some() => {
                let line = carrier_line.as_mut().expect("Checked in the guard");
                let up = read_carrier(line.as_mut());
                carrier.send_if_modified(|current| {
                    let changed = *current != up;
                    *current = up;
                    changed
                });
            }
        }
    }

    debug!("Serial port task done");
}
