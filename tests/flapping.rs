use color_eyre::Result;
use dock_line::{device::CarrierMode, session::Phase};
use pretty_assertions::assert_eq;

mod common;
use common::*;

#[tokio::test]
async fn a_flapping_device_gets_two_clean_sessions() -> Result<()> {
    let dir = DeviceDir::new();
    let path = dir.device_path("ttyGLIDER0");

    let mut dockserver = start_dockserver().await;

    let mock = dock_line::mock::MockSerial::new();
    let mut device = mock.device(&path);
    device.set_carrier(true);

    let config = forwarding_config(&[(&path, CarrierMode::Monitored)], dockserver.port);
    let (supervisor, mut events) = start_supervisor(config, mock);

    let id = path.as_str().into();
    wait_for_phase(&mut events, &id, Phase::Idle).await;

    // First cycle.
    dir.plug("ttyGLIDER0");
    wait_for_phase(&mut events, &id, Phase::Active).await;
    let port_one = within("first mock open", device.opened()).await;
    let _connection_one = dockserver.accept().await;

    dir.unplug("ttyGLIDER0");
    wait_for_phase(&mut events, &id, Phase::Idle).await;

    // Nothing of the first session may linger.
    assert!(port_one.is_released());

    // Second cycle.
    dir.plug("ttyGLIDER0");
    wait_for_phase(&mut events, &id, Phase::Active).await;
    let port_two = within("second mock open", device.opened()).await;
    let mut connection_two = dockserver.accept().await;

    assert_eq!(device.opens(), 2);

    port_two.send(&b"still here"[..]).await;
    assert_eq!(read_some(&mut connection_two).await, b"still here");

    assert!(!supervisor.is_finished());
    supervisor.abort();
    Ok(())
}

#[tokio::test]
async fn failed_open_is_retried_on_the_next_appearance() -> Result<()> {
    let dir = DeviceDir::new();
    let path = dir.device_path("ttyGLIDER0");

    let mut dockserver = start_dockserver().await;

    let mock = dock_line::mock::MockSerial::new();
    let mut device = mock.device(&path);
    device.set_carrier(true);
    device.fail_opens(1);

    let config = forwarding_config(&[(&path, CarrierMode::Monitored)], dockserver.port);
    let (supervisor, mut events) = start_supervisor(config, mock);

    let id = path.as_str().into();
    wait_for_phase(&mut events, &id, Phase::Idle).await;

    dir.plug("ttyGLIDER0");
    wait_for_phase(&mut events, &id, Phase::OpeningSerial).await;

    // The open fails; the session goes back to idle without a session.
    let phases = phases_until(&mut events, &id, Phase::Idle).await;
    assert!(!phases.contains(&Phase::Active));
    assert_eq!(device.opens(), 1);

    // Not retried until the device shows up again.
    dir.unplug("ttyGLIDER0");
    dir.plug("ttyGLIDER0");

    wait_for_phase(&mut events, &id, Phase::Active).await;
    let _port = within("mock open", device.opened()).await;
    let _connection = dockserver.accept().await;
    assert_eq!(device.opens(), 2);

    supervisor.abort();
    Ok(())
}

#[tokio::test]
async fn losing_one_device_does_not_disturb_the_other() -> Result<()> {
    let dir = DeviceDir::new();
    let path_a = dir.device_path("ttyGLIDER0");
    let path_b = dir.device_path("ttyGLIDER1");

    let mut dockserver = start_dockserver().await;

    let mock = dock_line::mock::MockSerial::new();
    let device_a = mock.device(&path_a);
    let mut device_b = mock.device(&path_b);
    device_a.set_carrier(true);
    device_b.set_carrier(true);

    let config = forwarding_config(
        &[
            (&path_a, CarrierMode::Monitored),
            (&path_b, CarrierMode::Monitored),
        ],
        dockserver.port,
    );
    let (supervisor, mut events) = start_supervisor(config, mock);

    let id_a = path_a.as_str().into();
    let id_b = path_b.as_str().into();
    wait_for_phase(&mut events, &id_a, Phase::Idle).await;
    wait_for_phase(&mut events, &id_b, Phase::Idle).await;

    // One at a time, so connections can be told apart.
    dir.plug("ttyGLIDER0");
    wait_for_phase(&mut events, &id_a, Phase::Active).await;
    let _connection_a = dockserver.accept().await;

    dir.plug("ttyGLIDER1");
    wait_for_phase(&mut events, &id_b, Phase::Active).await;
    let mut connection_b = dockserver.accept().await;

    dir.unplug("ttyGLIDER0");
    wait_for_phase(&mut events, &id_a, Phase::Idle).await;

    // B's session is untouched and still relays.
    let port_b = within("mock open B", device_b.opened()).await;
    port_b.send(&b"unaffected"[..]).await;
    assert_eq!(read_some(&mut connection_b).await, b"unaffected");

    // And the process as a whole is still up.
    assert!(!supervisor.is_finished());

    supervisor.abort();
    Ok(())
}

#[tokio::test]
async fn serial_error_while_active_is_local() -> Result<()> {
    let dir = DeviceDir::new();
    let path = dir.device_path("ttyGLIDER0");
    dir.plug("ttyGLIDER0");

    let mut dockserver = start_dockserver().await;

    let mock = dock_line::mock::MockSerial::new();
    let mut device = mock.device(&path);
    device.set_carrier(true);

    let config = forwarding_config(&[(&path, CarrierMode::Monitored)], dockserver.port);
    let (supervisor, mut events) = start_supervisor(config, mock);

    let id = path.as_str().into();
    wait_for_phase(&mut events, &id, Phase::Active).await;
    let port = within("mock open", device.opened()).await;
    let _connection = dockserver.accept().await;

    // The line dies without the device node going anywhere.
    port.fail().await;

    wait_for_phase(&mut events, &id, Phase::Idle).await;
    assert!(!supervisor.is_finished());

    supervisor.abort();
    Ok(())
}

#[tokio::test]
async fn carrier_loss_closes_the_session_locally() -> Result<()> {
    let dir = DeviceDir::new();
    let path = dir.device_path("ttyGLIDER0");
    dir.plug("ttyGLIDER0");

    let mut dockserver = start_dockserver().await;

    let mock = dock_line::mock::MockSerial::new();
    let mut device = mock.device(&path);
    device.set_carrier(true);

    let config = forwarding_config(&[(&path, CarrierMode::Monitored)], dockserver.port);
    let (supervisor, mut events) = start_supervisor(config, mock);

    let id = path.as_str().into();
    wait_for_phase(&mut events, &id, Phase::Active).await;
    let port = within("mock open", device.opened()).await;
    let _connection = dockserver.accept().await;

    device.set_carrier(false);

    let phases = phases_until(&mut events, &id, Phase::Idle).await;
    assert!(phases.contains(&Phase::Closing));
    assert!(port.is_released());
    assert!(!supervisor.is_finished());

    supervisor.abort();
    Ok(())
}
