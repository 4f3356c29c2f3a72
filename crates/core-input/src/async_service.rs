use crate::protocol::parse_line;
use core_events::{CHANNEL_SEND_FAILURES, Event, HOST_MESSAGES_MALFORMED, HOST_MESSAGES_TOTAL};
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, mpsc::Sender};
use tokio::task;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct HostInputShutdown {
    notify: Arc<Notify>,
}

impl HostInputShutdown {
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

#[derive(Clone, Debug)]
struct ShutdownListener {
    notify: Arc<Notify>,
}

impl ShutdownListener {
    fn new_pair() -> (HostInputShutdown, Self) {
        let notify = Arc::new(Notify::new());
        (
            HostInputShutdown {
                notify: notify.clone(),
            },
            ShutdownListener { notify },
        )
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Spawn the reader task over the process's stdin.
pub(crate) fn spawn_stdin_task(sender: Sender<Event>) -> (task::JoinHandle<()>, HostInputShutdown) {
    let (shutdown, listener) = ShutdownListener::new_pair();
    let handle = task::spawn(async move {
        let stream = SplitStream::new(BufReader::new(tokio::io::stdin()).split(b'\n'));
        HostLineTask::new(sender, stream, listener).run().await;
    });
    (handle, shutdown)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExitReason {
    Running,
    ShutdownSignal,
    ShutdownMessage,
    ChannelClosed,
    StreamEnded,
    StreamError,
}

impl ExitReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Running => "running",
            ExitReason::ShutdownSignal => "shutdown_signal",
            ExitReason::ShutdownMessage => "shutdown_message",
            ExitReason::ChannelClosed => "channel_closed",
            ExitReason::StreamEnded => "stream_ended",
            ExitReason::StreamError => "stream_error",
        }
    }
}

fn record_malformed(line_len: usize, error: &dyn std::fmt::Display) {
    HOST_MESSAGES_MALFORMED.fetch_add(1, Ordering::Relaxed);
    warn!(
        target: "input.protocol",
        line_len,
        error = %error,
        "malformed_host_message"
    );
}

pub(crate) struct HostLineTask<S>
where
    S: tokio_stream::Stream<Item = io::Result<Vec<u8>>> + Send + Unpin + 'static,
{
    sender: Sender<Event>,
    stream: S,
    shutdown: ShutdownListener,
    exit_reason: ExitReason,
    stream_error: Option<io::ErrorKind>,
}

impl<S> HostLineTask<S>
where
    S: tokio_stream::Stream<Item = io::Result<Vec<u8>>> + Send + Unpin + 'static,
{
    fn new(sender: Sender<Event>, stream: S, shutdown: ShutdownListener) -> Self {
        Self {
            sender,
            stream,
            shutdown,
            exit_reason: ExitReason::Running,
            stream_error: None,
        }
    }

    pub async fn run(mut self) {
        info!(target: "input.protocol", "host_input_started");
        loop {
            let maybe_line = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    self.exit_reason = ExitReason::ShutdownSignal;
                    break;
                }
                line = self.stream.next() => line,
            };

            let Some(result) = maybe_line else {
                self.exit_reason = ExitReason::StreamEnded;
                break;
            };

            match result {
                Ok(raw) => {
                    if !self.handle_raw_line(raw).await {
                        break;
                    }
                }
                Err(err) => {
                    self.exit_reason = ExitReason::StreamError;
                    self.stream_error = Some(err.kind());
                    break;
                }
            }
        }

        if let Some(kind) = self.stream_error {
            warn!(target: "input.protocol", error_kind = ?kind, "host_input_stream_error");
        }

        // The host going away means the session is over.
        if matches!(
            self.exit_reason,
            ExitReason::StreamEnded | ExitReason::StreamError
        ) {
            let _ = self.send_event(Event::Shutdown).await;
        }

        info!(
            target: "input.protocol",
            reason = self.exit_reason.as_str(),
            "host_input_stopped"
        );
    }

    /// Lines that are not UTF-8 are malformed messages, not stream failures.
    async fn handle_raw_line(&mut self, raw: Vec<u8>) -> bool {
        match String::from_utf8(raw) {
            Ok(line) => self.handle_line(&line).await,
            Err(err) => {
                record_malformed(err.as_bytes().len(), &err);
                true
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> bool {
        match parse_line(line) {
            Ok(None) => true,
            Ok(Some(event)) => {
                HOST_MESSAGES_TOTAL.fetch_add(1, Ordering::Relaxed);
                let last = matches!(event, Event::Shutdown);
                if !self.send_event(event).await {
                    return false;
                }
                if last {
                    self.exit_reason = ExitReason::ShutdownMessage;
                    return false;
                }
                true
            }
            Err(err) => {
                record_malformed(line.len(), &err);
                true
            }
        }
    }

    async fn send_event(&mut self, event: Event) -> bool {
        match self.sender.send(event).await {
            Ok(()) => true,
            Err(_) => {
                CHANNEL_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
                debug!(target: "input.protocol", "event_channel_closed");
                if !matches!(self.exit_reason, ExitReason::ShutdownSignal) {
                    self.exit_reason = ExitReason::ChannelClosed;
                }
                false
            }
        }
    }
}
