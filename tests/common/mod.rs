#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dock_line::{
    config::{Config, Dockserver},
    device::{CarrierMode, DeviceConfig, DeviceId},
    error::Error,
    events::{Event, TimestampedEvent},
    mock::MockSerial,
    session::Phase,
    supervisor::Supervisor,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Five seconds is an eternity for an in-memory test; anything slower is
/// a hang.
pub async fn within<F, T>(what: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("Timed out: {what}"))
}

/// A TCP listener standing in for the dockserver.
/// Accepted connections are handed to the test for inspection.
pub struct MockDockserver {
    pub port: u16,
    connections: mpsc::UnboundedReceiver<TcpStream>,
}

pub async fn start_dockserver() -> MockDockserver {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should be able to bind an ephemeral port");
    let port = listener.local_addr().expect("Bound socket has an address").port();

    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if tx.send(stream).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    MockDockserver {
        port,
        connections: rx,
    }
}

impl MockDockserver {
    pub async fn accept(&mut self) -> TcpStream {
        within("dockserver accept", self.connections.recv())
            .await
            .expect("The listener should be alive")
    }
}

/// A port that is no longer listening, for unreachable-dockserver tests.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// A temp directory standing in for /dev.
/// Plugging a device creates its node, unplugging removes it.
pub struct DeviceDir {
    dir: tempfile::TempDir,
}

impl DeviceDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Should be able to create a temp dir"),
        }
    }

    pub fn device_path(&self, name: &str) -> String {
        self.dir
            .path()
            .join(name)
            .to_str()
            .expect("Temp paths are valid utf8")
            .to_string()
    }

    pub fn plug(&self, name: &str) {
        std::fs::write(self.dir.path().join(name), b"").expect("Should be able to create a node");
    }

    pub fn unplug(&self, name: &str) {
        std::fs::remove_file(self.dir.path().join(name)).expect("The node should exist");
    }
}

pub fn forwarding_config(devices: &[(&str, CarrierMode)], port: u16) -> Config {
    Config {
        devices: devices
            .iter()
            .map(|(path, mode)| DeviceConfig {
                path: (*path).into(),
                mode: *mode,
            })
            .collect(),
        dockserver: Dockserver {
            host: "127.0.0.1".into(),
            port,
        },
        connect_timeout_ms: 2_000,
        open_delay_ms: 0,
    }
}

pub type SupervisorHandle = JoinHandle<Result<(), Error>>;

pub fn start_supervisor(
    config: Config,
    opener: MockSerial,
) -> (SupervisorHandle, broadcast::Receiver<TimestampedEvent>) {
    let supervisor = Supervisor::new(config, Arc::new(opener)).expect("Config should be valid");
    let events = supervisor.subscribe();

    (tokio::spawn(supervisor.run()), events)
}

async fn next_phase(
    events: &mut broadcast::Receiver<TimestampedEvent>,
    device: &DeviceId,
) -> Phase {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Event::Phase { device: d, phase } = event.inner {
                    if &d == device {
                        return phase;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("Event stream closed"),
        }
    }
}

/// Wait until the device's session reports the given phase.
pub async fn wait_for_phase(
    events: &mut broadcast::Receiver<TimestampedEvent>,
    device: &DeviceId,
    phase: Phase,
) {
    within(&format!("waiting for {device} to reach `{phase}`"), async {
        loop {
            if next_phase(events, device).await == phase {
                break;
            }
        }
    })
    .await
}

/// Collect the device's phases up to and including the given one.
pub async fn phases_until(
    events: &mut broadcast::Receiver<TimestampedEvent>,
    device: &DeviceId,
    until: Phase,
) -> Vec<Phase> {
    within(&format!("collecting phases until `{until}`"), async {
        let mut phases = vec![];
        loop {
            let phase = next_phase(events, device).await;
            phases.push(phase);
            if phase == until {
                break phases;
            }
        }
    })
    .await
}

/// The phases currently queued for the device, without waiting.
pub fn drain_phases(
    events: &mut broadcast::Receiver<TimestampedEvent>,
    device: &DeviceId,
) -> Vec<Phase> {
    let mut phases = vec![];
    while let Ok(event) = events.try_recv() {
        if let Event::Phase { device: d, phase } = event.inner {
            if &d == device {
                phases.push(phase);
            }
        }
    }
    phases
}

/// Read whatever arrives next on the socket.
pub async fn read_some(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let n = within("socket read", socket.read(&mut buf))
        .await
        .expect("Socket should be readable");
    buf[..n].to_vec()
}
