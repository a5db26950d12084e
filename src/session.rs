use std::fmt::Display;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    carrier::{CarrierEvent, CarrierEvents},
    config::{Config, Dockserver},
    device::{CarrierMode, DeviceConfig, DeviceId},
    error::Error,
    forward::{self, TerminationReason},
    serial::{SerialHandle, SerialOpen},
};

/// Where a device's session currently is.
///
/// A session cycles `Idle → OpeningSerial → WaitingCarrier (monitored
/// only) → ConnectingTcp → Active → Closing → Idle` for as long as the
/// process lives. Repeated cycles are normal; devices flap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the device to be present.
    Idle,

    /// The device showed up; opening the serial port.
    OpeningSerial,

    /// Port open, waiting for the carrier-detect line to come up.
    /// Direct devices never enter this phase.
    WaitingCarrier,

    /// Establishing the dockserver connection.
    ConnectingTcp,

    /// Forwarding bytes.
    Active,

    /// Releasing the serial handle and the socket.
    Closing,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::OpeningSerial => write!(f, "opening serial"),
            Phase::WaitingCarrier => write!(f, "waiting for carrier"),
            Phase::ConnectingTcp => write!(f, "connecting to dockserver"),
            Phase::Active => write!(f, "active"),
            Phase::Closing => write!(f, "closing"),
        }
    }
}

/// What sessions tell the supervisor.
#[derive(Debug)]
pub(crate) enum Report {
    /// The session moved to a new phase.
    Phase {
        device: DeviceId,
        phase: Phase,
    },

    /// The session observed the dockserver link failing.
    /// The supervisor takes the whole process down.
    Fatal {
        device: DeviceId,
        error: Error,
    },
}

/// How one pass through the state machine ended.
enum Exit {
    /// The serial side went away. Routine; back to idle.
    Serial,

    /// The dockserver link failed.
    Fatal(Error),

    /// The supervisor is gone; the task should end.
    Shutdown,
}

/// What to do after waiting for carrier.
enum Step {
    Proceed,
    Close,
    Shutdown,
}

/// One device's session state machine.
///
/// Consumes presence and carrier events, owns the serial handle and the
/// dockserver socket while active, and never shares either.
pub(crate) struct Session {
    device: DeviceConfig,
    dockserver: Dockserver,
    connect_timeout: Duration,
    open_delay: Duration,
    opener: Arc<dyn SerialOpen>,
    presence: mpsc::UnboundedReceiver<bool>,
    reports: mpsc::UnboundedSender<Report>,
}

impl Session {
    pub(crate) fn new(
        device: DeviceConfig,
        config: &Config,
        opener: Arc<dyn SerialOpen>,
        presence: mpsc::UnboundedReceiver<bool>,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Self {
        Self {
            device,
            dockserver: config.dockserver.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            open_delay: Duration::from_millis(config.open_delay_ms),
            opener,
            presence,
            reports,
        }
    }

    fn set_phase(&self, phase: Phase) {
        debug!(%phase, "Phase change");

        let _ = self.reports.send(Report::Phase {
            device: self.device.path.clone(),
            phase,
        });
    }

    pub(crate) async fn run(mut self) {
        self.set_phase(Phase::Idle);

        loop {
            let present = match self.presence.recv().await {
                Some(present) => present,
                None => break,
            };

            if !present {
                continue;
            }

            if self.cycle().await.is_break() {
                break;
            }
        }

        debug!("Session task ending");
    }

    /// One `Idle → … → Idle` pass. Breaks when the task should end.
    async fn cycle(&mut self) -> ControlFlow<()> {
        self.set_phase(Phase::OpeningSerial);

        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let mut handle = match self.opener.open(&self.device) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(%error, "Will retry when the device shows up again");
                self.set_phase(Phase::Idle);
                return ControlFlow::Continue(());
            }
        };

        let mut carrier = matches!(self.device.mode, CarrierMode::Monitored)
            .then(|| CarrierEvents::subscribe(&handle));

        let exit = self.drive(&mut handle, &mut carrier).await;

        self.set_phase(Phase::Closing);
        drop(carrier);
        drop(handle);
        self.set_phase(Phase::Idle);

        match exit {
            Exit::Serial => ControlFlow::Continue(()),
            Exit::Fatal(error) => {
                let _ = self.reports.send(Report::Fatal {
                    device: self.device.path.clone(),
                    error,
                });
                ControlFlow::Break(())
            }
            Exit::Shutdown => ControlFlow::Break(()),
        }
    }

    /// From freshly opened serial handle to the end of the session.
    async fn drive(
        &mut self,
        handle: &mut SerialHandle,
        carrier: &mut Option<CarrierEvents>,
    ) -> Exit {
        if carrier.is_some() {
            self.set_phase(Phase::WaitingCarrier);

            match self.await_carrier(carrier).await {
                Step::Proceed => {}
                Step::Close => return Exit::Serial,
                Step::Shutdown => return Exit::Shutdown,
            }
        }

        self.set_phase(Phase::ConnectingTcp);

        let socket = match self.connect().await {
            Ok(socket) => socket,
            Err(error) => return Exit::Fatal(error),
        };

        info!(
            "Forwarding {} <-> {}:{}",
            self.device.path, self.dockserver.host, self.dockserver.port
        );
        self.set_phase(Phase::Active);

        self.forward(handle, carrier, socket).await
    }

    /// Wait until carrier comes up, the device disappears, or everything
    /// is shutting down.
    async fn await_carrier(&mut self, carrier: &mut Option<CarrierEvents>) -> Step {
        loop {
            tokio::select! {
                // A device that is physically gone outranks whatever the
                // carrier line claims.
                biased;

                presence = self.presence.recv() => match presence {
                    Some(true) => continue,
                    Some(false) => {
                        debug!("Device removed while waiting for carrier");
                        break Step::Close;
                    }
                    None => break Step::Shutdown,
                },
                event = next_carrier(carrier) => match event {
                    Some(CarrierEvent { up: true }) => {
                        debug!("Carrier up");
                        break Step::Proceed;
                    }
                    Some(CarrierEvent { up: false }) => continue,
                    // The port went away underneath us.
                    None => break Step::Close,
                },
            }
        }
    }

    async fn connect(&self) -> Result<TcpStream, Error> {
        let host = self.dockserver.host.as_str();
        let port = self.dockserver.port;

        match timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(socket)) => Ok(socket),
            Ok(Err(e)) => Err(Error::TcpConnect {
                device: self.device.path.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::TcpConnect {
                device: self.device.path.clone(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            }),
        }
    }

    /// Run the relay until something ends the session.
    async fn forward(
        &mut self,
        handle: &mut SerialHandle,
        carrier: &mut Option<CarrierEvents>,
        socket: TcpStream,
    ) -> Exit {
        let relay = forward::run(handle, socket);
        tokio::pin!(relay);

        loop {
            tokio::select! {
                // Same tie-break as while waiting for carrier: presence
                // loss wins over a carrier glitch in the same batch.
                biased;

                presence = self.presence.recv() => match presence {
                    Some(true) => continue,
                    Some(false) => {
                        info!("Device removed, closing its dockserver connection");
                        break Exit::Serial;
                    }
                    None => break Exit::Shutdown,
                },
                event = next_carrier(carrier) => match event {
                    Some(CarrierEvent { up: false }) => {
                        info!("Carrier lost, closing the dockserver connection");
                        break Exit::Serial;
                    }
                    Some(CarrierEvent { up: true }) => continue,
                    None => break Exit::Serial,
                },
                reason = &mut relay => break match reason {
                    TerminationReason::SerialClosed | TerminationReason::SerialError => {
                        info!(?reason, "Serial side ended the session");
                        Exit::Serial
                    }
                    TerminationReason::TcpClosed => Exit::Fatal(Error::TcpLinkLost {
                        device: self.device.path.clone(),
                        reason: "connection closed by the dockserver".into(),
                    }),
                    TerminationReason::TcpError => Exit::Fatal(Error::TcpLinkLost {
                        device: self.device.path.clone(),
                        reason: "connection error".into(),
                    }),
                },
            }
        }
    }
}

/// The next carrier event, or pend forever for direct devices.
///
/// Letting disabled-subscription arms pend keeps the select arms in the
/// session uniform across carrier modes.
async fn next_carrier(events: &mut Option<CarrierEvents>) -> Option<CarrierEvent> {
    match events {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}
