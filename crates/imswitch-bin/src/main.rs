//! `imswitch`: puts the default input method back whenever a modal editor
//! enters Normal mode.
//!
//! Daemon mode reads the host protocol from stdin and writes notifications
//! to stdout. The subcommands run a single action and exit.

mod runtime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_config::{ConfigResolver, FileConfigResolver};
use core_events::{CommandEvent, ConfigWatchSource, EVENT_CHANNEL_CAP, Event, EventSourceRegistry};
use core_exec::{CommandRunner, ShellRunner};
use core_input::StdoutNotifier;
use core_switcher::{ModeSwitcher, Notification, NotificationKind, Notifier, SwitchExecutor};
use runtime::SwitcherRuntime;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "imswitch.log";

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "imswitch",
    version,
    about = "Switch to the default input method when a modal editor enters Normal mode"
)]
struct Args {
    /// Configuration file path (overrides discovery of `imswitch.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Log file path.
    #[arg(long = "log-file", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,
    /// Re-read the configuration file when it changes on disk.
    #[arg(long = "watch-config")]
    watch_config: bool,
    #[command(subcommand)]
    command: Option<OneShot>,
}

/// Run one action and exit instead of serving the host protocol.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum OneShot {
    /// Switch to the configured default input method.
    Switch,
    /// Print the current input method.
    Query,
    /// Print the resolved configuration.
    DumpConfig,
}

impl OneShot {
    fn action(self) -> CommandEvent {
        match self {
            OneShot::Switch => CommandEvent::SwitchInputMethod,
            OneShot::Query => CommandEvent::QueryInputMethod,
            OneShot::DumpConfig => CommandEvent::DumpConfig,
        }
    }
}

/// Plain-text notifications for one-shot runs.
#[derive(Debug, Default)]
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let written = match notification.kind {
            NotificationKind::Info => emit_line(std::io::stdout().lock(), &notification.message),
            NotificationKind::Error => emit_line(std::io::stderr().lock(), &notification.message),
        };
        if let Err(e) = written {
            warn!(target: "runtime", error = %e, "notification_write_failed");
        }
    }
}

fn emit_line(mut out: impl Write, message: &str) -> std::io::Result<()> {
    writeln!(out, "{message}")?;
    out.flush()
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
    log_path: PathBuf,
}

impl AppStartup {
    fn new(log_file: &Path) -> Self {
        Self {
            log_guard: None,
            log_path: std::path::absolute(log_file).unwrap_or_else(|_| log_file.to_path_buf()),
        }
    }

    fn configure_logging(&mut self) -> Result<()> {
        if self.log_path.exists() {
            let _ = std::fs::remove_file(&self.log_path);
        }
        let log_dir = self
            .log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = self
            .log_path
            .file_name()
            .with_context(|| format!("log path {} has no file name", self.log_path.display()))?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name.to_string_lossy().into_owned())
            .build(log_dir)
            .with_context(|| format!("cannot open log file {}", self.log_path.display()))?;
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed; drop guard so writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn config_resolver(args: &Args) -> FileConfigResolver {
    match args.config.as_ref() {
        Some(path) => FileConfigResolver::new(path),
        None => FileConfigResolver::discovered(),
    }
}

fn build_executor(
    resolver: FileConfigResolver,
    notifier: Arc<dyn Notifier>,
    log_path: &Path,
) -> SwitchExecutor {
    SwitchExecutor::new(
        Arc::new(resolver) as Arc<dyn ConfigResolver>,
        Arc::new(ShellRunner::new()) as Arc<dyn CommandRunner>,
        notifier,
    )
    .with_log_path(log_path)
}

async fn run_one_shot(exec: SwitchExecutor, command: OneShot) {
    info!(target: "runtime", action = command.action().as_str(), "one_shot");
    exec.run_action(command.action()).await;
}

async fn run_daemon(args: &Args, startup: &AppStartup) {
    let resolver = config_resolver(args);
    let config_path = resolver.path().to_path_buf();
    info!(
        target: "runtime",
        config = %config_path.display(),
        watch = args.watch_config,
        "daemon_started"
    );

    let exec = build_executor(resolver, Arc::new(StdoutNotifier), &startup.log_path);
    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let (input_task, input_shutdown) = core_input::spawn_host_input(tx.clone());
    let mut registry = EventSourceRegistry::new();
    if args.watch_config {
        registry.register(ConfigWatchSource::new(config_path));
    }
    let source_handles = registry.spawn_all(&tx);

    let mut runtime = SwitcherRuntime::new(ModeSwitcher::new(exec), tx, rx, source_handles)
        .with_input(input_task, input_shutdown);
    let reason = runtime.run().await;
    info!(target: "runtime", %reason, "daemon_stopped");
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut startup = AppStartup::new(&args.log_file);
    startup.configure_logging()?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", log = %startup.log_path.display(), "startup");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match args.command {
        Some(command) => {
            let exec = build_executor(
                config_resolver(&args),
                Arc::new(ConsoleNotifier),
                &startup.log_path,
            );
            rt.block_on(run_one_shot(exec, command));
        }
        None => rt.block_on(run_daemon(&args, &startup)),
    }

    // A pending stdin read holds a blocking thread that will never finish.
    rt.shutdown_timeout(Duration::from_millis(200));
    Ok(())
}
