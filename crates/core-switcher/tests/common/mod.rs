#![allow(dead_code)]

use core_config::{Config, ConfigResolver, StaticConfigResolver};
use core_events::HostEvent;
use core_exec::{CommandOutput, CommandRunner, ExecError, ExecFuture};
use core_switcher::{
    ModeSwitcher, Notifier, RecordingNotifier, SwitchExecutor, SwitchOrigin, Trigger,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::Interest;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Records every command and replays scripted results (default: empty success).
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<CommandOutput, ExecError>>>,
}

impl ScriptedRunner {
    pub fn push_ok(&self, stdout: &str, stderr: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(CommandOutput::new(stdout, stderr)));
    }

    pub fn push_err(&self, err: ExecError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, command: &'a str) -> ExecFuture<'a> {
        self.calls.lock().unwrap().push(command.to_string());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()));
        Box::pin(async move { next })
    }
}

pub fn enabled_config() -> Config {
    Config {
        enable: true,
        default_im: "com.apple.keylayout.ABC".into(),
        obtain_im_cmd: "im-select".into(),
        switch_im_cmd: "im-select {im}".into(),
        normal_cursor_style: Some("block".into()),
        insert_cursor_style: Some("line".into()),
        ..Config::default()
    }
}

pub fn non_zero_exit(command: &str) -> ExecError {
    ExecError::NonZeroExit {
        command: command.to_string(),
        code: Some(1),
        stderr: "not found".into(),
    }
}

pub struct Harness {
    pub config: Arc<StaticConfigResolver>,
    pub runner: Arc<ScriptedRunner>,
    pub notifier: Arc<RecordingNotifier>,
    pub switcher: ModeSwitcher,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let resolver = Arc::new(StaticConfigResolver::new(config));
        let runner = Arc::new(ScriptedRunner::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let exec = SwitchExecutor::new(
            resolver.clone() as Arc<dyn ConfigResolver>,
            runner.clone() as Arc<dyn CommandRunner>,
            notifier.clone() as Arc<dyn Notifier>,
        );
        Self {
            config: resolver,
            runner,
            notifier,
            switcher: ModeSwitcher::new(exec),
        }
    }

    pub fn exec(&self) -> &SwitchExecutor {
        self.switcher.executor()
    }

    /// Handle one event the way the runtime does, awaiting any switch inline.
    pub async fn dispatch(&mut self, event: HostEvent) -> Trigger {
        let trigger = self.switcher.handle(&event);
        if let Trigger::Switch(origin) = trigger {
            let _ = self.exec().switch_input_method(origin).await;
        }
        trigger
    }

    pub async fn switch(&self, origin: SwitchOrigin) {
        let _ = self.exec().switch_input_method(origin).await;
    }
}

// -------------------------------------------------------------------------------------------------
// Log capture
// -------------------------------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LogCapture {
    pub events: Arc<Mutex<Vec<CapturedLog>>>,
}

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub target: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedLog {
    pub fn message(&self) -> Option<&str> {
        self.field("message")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl LogCapture {
    pub fn find(&self, target: &str, message: &str) -> Option<CapturedLog> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.target == target && e.message() == Some(message))
            .cloned()
    }
}

#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .push((field.name().to_string(), format!("{:?}", value)));
    }
}

impl<S> Layer<S> for LogCapture
where
    S: Subscriber,
{
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::always()
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let meta = event.metadata();
        self.events.lock().unwrap().push(CapturedLog {
            target: meta.target().to_string(),
            fields: collector.fields,
        });
    }
}
