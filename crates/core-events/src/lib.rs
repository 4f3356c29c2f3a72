//! Core event types and event source plumbing for imswitch.
//!
//! Every host notification (cursor style, active editor, window focus,
//! configuration edits, manual actions) is normalized into an [`Event`] and
//! pushed into one bounded channel. A single consumer loop in the binary
//! handles them strictly in delivery order.

mod config_watch;

pub use config_watch::{ConfigWatchSource, changed_sections};

use core_config::{AUTO_SWITCH_SECTION, CURSOR_STYLE_SECTION, CursorStyle};
use std::fmt;
use std::sync::atomic::AtomicU64;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// Producers (stdin protocol reader, config watcher) use awaited `send`, so a slow consumer parks
// the producer instead of dropping events. Host traffic is a handful of events per keystroke at
// most; the capacity only bounds memory if the consumer stalls on a wedged handler.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 1024;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static HOST_MESSAGES_TOTAL: AtomicU64 = AtomicU64::new(0); // well-formed protocol lines
pub static HOST_MESSAGES_MALFORMED: AtomicU64 = AtomicU64::new(0); // lines skipped as unparseable
pub static CONFIG_WATCH_NOTIFICATIONS: AtomicU64 = AtomicU64::new(0); // section changes emitted

/// Top-level event enum consumed by the central event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Host(HostEvent),
    Command(CommandEvent),
    Shutdown,
}

/// Change notifications from the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Editor options changed. `None` when the host reported no cursor style.
    CursorStyleChanged(Option<CursorStyle>),
    /// The active text editor changed. `None` when no editor is active.
    ActiveEditorChanged(Option<EditorInfo>),
    /// Window focus changed.
    WindowFocusChanged {
        focused: bool,
        /// Whether an active editor with a document exists at this moment.
        active_document: bool,
    },
    /// A configuration section was edited.
    ConfigChanged(ConfigSection),
}

/// The editor that just became active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorInfo {
    /// Document path or URI; `None` for editors without a backing document.
    pub document: Option<String>,
    pub language_id: Option<String>,
    /// Cursor style the editor currently renders, when the host knows it.
    pub cursor_style: Option<CursorStyle>,
}

impl EditorInfo {
    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }
}

/// Which configuration section an edit touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    /// `vim.autoSwitchInputMethod`
    AutoSwitch,
    /// `vim.cursorStylePerMode`
    CursorStyle,
    Other(String),
}

impl ConfigSection {
    pub fn from_name(name: &str) -> Self {
        match name {
            AUTO_SWITCH_SECTION => ConfigSection::AutoSwitch,
            CURSOR_STYLE_SECTION => ConfigSection::CursorStyle,
            other => ConfigSection::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ConfigSection::AutoSwitch => AUTO_SWITCH_SECTION,
            ConfigSection::CursorStyle => CURSOR_STYLE_SECTION,
            ConfigSection::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Manual actions exposed on the host's command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandEvent {
    SwitchInputMethod,
    QueryInputMethod,
    DumpConfig,
    ShowLog,
}

impl CommandEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandEvent::SwitchInputMethod => "switch",
            CommandEvent::QueryInputMethod => "query",
            CommandEvent::DumpConfig => "dump_config",
            CommandEvent::ShowLog => "show_log",
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Async Event Sources
// -------------------------------------------------------------------------------------------------
// Each host subscription (stdin protocol, config file watcher) is an independent producer with its
// own task lifecycle. On channel send failure (consumer dropped) a source must terminate promptly.
// -------------------------------------------------------------------------------------------------

/// Trait implemented by any async event producer. Implementors usually hold configuration and
/// spawn one background task that pushes `Event`s into the shared channel.
pub trait AsyncEventSource: Send + 'static {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning a JoinHandle. Implementors should
    /// stop when `tx.send(..).await` returns Err (channel closed) or on their own internal stop
    /// condition.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources spawned together at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawn all registered sources, returning their JoinHandles. Each source receives its own
    /// `Sender` clone; during shutdown the caller drops its final clone before awaiting the
    /// handles so sources observe the closed channel and exit cooperatively.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        // Drain so a second call cannot spawn duplicates.
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}
