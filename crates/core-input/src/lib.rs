//! Host input: turns the editor host's stdin protocol into runtime events.

mod async_service;
pub mod protocol;

pub use async_service::HostInputShutdown;
pub use protocol::{HostMessage, StdoutNotifier, encode_notification, parse_line};

use async_service::spawn_stdin_task;
use core_events::Event;
use tokio::task::JoinHandle;

/// Spawn the stdin reader.
///
/// Returns the `JoinHandle` for the background task alongside a shutdown handle
/// that can be used to request immediate termination.
pub fn spawn_host_input(
    sender: tokio::sync::mpsc::Sender<Event>,
) -> (JoinHandle<()>, HostInputShutdown) {
    spawn_stdin_task(sender)
}
