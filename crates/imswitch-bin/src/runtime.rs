use core_events::{CommandEvent, Event, HostEvent};
use core_input::HostInputShutdown;
use core_switcher::{ModeSwitcher, Trigger};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, trace, warn};

const SOURCE_STOP_TIMEOUT: Duration = Duration::from_millis(200);
const SWITCH_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    ShutdownEvent,
    ChannelClosed,
}

impl ShutdownReason {
    fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::ShutdownEvent => "shutdown_event",
            ShutdownReason::ChannelClosed => "channel_closed",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn log_shutdown_stage(reason: ShutdownReason, stage: &'static str) {
    info!(
        target: "runtime.shutdown",
        reason = reason.as_str(),
        stage = stage,
        "shutdown_stage"
    );
}

/// Single-writer event loop: owns the [`ModeSwitcher`] and turns its triggers
/// into spawned command runs.
pub(crate) struct SwitcherRuntime {
    switcher: ModeSwitcher,
    rx: mpsc::Receiver<Event>,
    tx: Option<mpsc::Sender<Event>>,
    source_handles: Vec<JoinHandle<()>>,
    input_task: Option<JoinHandle<()>>,
    input_shutdown: Option<HostInputShutdown>,
    in_flight: Vec<JoinHandle<()>>,
}

impl SwitcherRuntime {
    pub(crate) fn new(
        switcher: ModeSwitcher,
        tx: mpsc::Sender<Event>,
        rx: mpsc::Receiver<Event>,
        source_handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            switcher,
            rx,
            tx: Some(tx),
            source_handles,
            input_task: None,
            input_shutdown: None,
            in_flight: Vec::new(),
        }
    }

    pub(crate) fn with_input(mut self, task: JoinHandle<()>, shutdown: HostInputShutdown) -> Self {
        self.input_task = Some(task);
        self.input_shutdown = Some(shutdown);
        self
    }

    pub(crate) async fn run(&mut self) -> ShutdownReason {
        let span = tracing::debug_span!(target: "runtime", "event_loop");
        let reason = self.event_loop().instrument(span).await;

        self.rx.close();
        self.finalize_shutdown(reason).await;
        reason
    }

    async fn event_loop(&mut self) -> ShutdownReason {
        while let Some(event) = self.rx.recv().await {
            self.in_flight.retain(|h| !h.is_finished());
            match event {
                Event::Host(host) => self.handle_host_event(&host),
                Event::Command(cmd) => self.handle_command_event(cmd),
                Event::Shutdown => return ShutdownReason::ShutdownEvent,
            }
        }
        ShutdownReason::ChannelClosed
    }

    fn handle_host_event(&mut self, event: &HostEvent) {
        if let Trigger::Switch(origin) = self.switcher.handle(event) {
            trace!(target: "runtime", origin = origin.as_str(), "switch_spawned");
            self.in_flight
                .push(self.switcher.executor().spawn_switch(origin));
        }
    }

    fn handle_command_event(&mut self, cmd: CommandEvent) {
        debug!(target: "runtime", action = cmd.as_str(), "command_received");
        let exec = self.switcher.executor().clone();
        self.in_flight
            .push(tokio::spawn(async move { exec.run_action(cmd).await }));
    }

    async fn finalize_shutdown(&mut self, reason: ShutdownReason) {
        log_shutdown_stage(reason, "begin");
        if let Some(tx) = self.tx.take() {
            trace!(
                target: "runtime.shutdown",
                reason = reason.as_str(),
                "dropping_runtime_sender"
            );
            drop(tx);
        }

        if let Some(shutdown) = self.input_shutdown.take() {
            trace!(
                target: "runtime.shutdown",
                reason = reason.as_str(),
                "input_task_shutdown_signal"
            );
            shutdown.signal();
        }

        while let Some(handle) = self.source_handles.pop() {
            match tokio::time::timeout(SOURCE_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_stopped"
                ),
                Ok(Err(err)) if err.is_cancelled() => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_cancelled"
                ),
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "event_source_task_error"
                ),
                Err(_) => warn!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_timeout"
                ),
            }
        }

        if let Some(handle) = self.input_task.take() {
            match tokio::time::timeout(SOURCE_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "input_task_joined"
                ),
                Ok(Err(err)) if err.is_cancelled() => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "input_task_cancelled"
                ),
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "input_task_join_failed"
                ),
                Err(_) => warn!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "input_task_timeout"
                ),
            }
        }

        log_shutdown_stage(reason, "draining_switches");
        let deadline = Instant::now() + SWITCH_GRACE;
        for handle in self.in_flight.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "switch_task_failed"
                ),
                Err(_) => {
                    abort.abort();
                    warn!(
                        target: "runtime.shutdown",
                        reason = reason.as_str(),
                        "switch_task_abandoned"
                    );
                }
            }
        }

        log_shutdown_stage(reason, "complete");
    }
}
