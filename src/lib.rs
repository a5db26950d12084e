#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Carrier-detect event subscriptions for monitored devices.
pub mod carrier;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Device identities, carrier modes and the configured-device registry.
pub mod device;

/// Possible errors in this library.
pub mod error;

/// Events the forwarder emits.
pub mod events;

/// The bidirectional byte relay between an open serial handle and a
/// dockserver socket.
pub mod forward;

/// Logging/tracing setup.
pub mod logging;

/// Mocked serial devices, useful for testing without hardware.
pub mod mock;

/// Watches the filesystem for device nodes appearing and disappearing.
pub mod presence;

/// Serial port handles and the native serial driver.
pub mod serial;

/// The per-device session state machine.
pub mod session;

/// Runs on top of everything else.
///
/// Spawns the presence watcher and one session per configured device,
/// and turns any dockserver link failure into a fatal result.
pub mod supervisor;
