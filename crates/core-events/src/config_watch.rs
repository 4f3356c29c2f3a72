//! Config file watcher source.
//!
//! Watches the directory holding the config file (editors commonly save by
//! rename, which a file-level watch would miss), re-resolves the file on each
//! relevant notification and emits one `ConfigChanged` per section whose
//! content actually differs from the previous snapshot.

use crate::{
    AsyncEventSource, CHANNEL_SEND_FAILURES, CONFIG_WATCH_NOTIFICATIONS, ConfigSection, Event,
    HostEvent,
};
use anyhow::{Context, Result};
use core_config::{Config, ConfigResolver, FileConfigResolver};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WATCH_QUEUE_CAP: usize = 16;

/// Emits `HostEvent::ConfigChanged` when the watched TOML file changes.
pub struct ConfigWatchSource {
    resolver: FileConfigResolver,
}

impl ConfigWatchSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            resolver: FileConfigResolver::new(path),
        }
    }
}

/// Sections whose content differs between two snapshots, in a stable order.
pub fn changed_sections(prev: &Config, next: &Config) -> Vec<ConfigSection> {
    let mut out = Vec::new();
    if prev.auto_switch_section() != next.auto_switch_section() {
        out.push(ConfigSection::AutoSwitch);
    }
    if prev.cursor_style_section() != next.cursor_style_section() {
        out.push(ConfigSection::CursorStyle);
    }
    out
}

fn watch_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn is_relevant(event: &notify::Event, file_name: &OsString) -> bool {
    let kind_matches = match event.kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    };
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn start_watcher(path: &Path, notify_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let file_name = path
        .file_name()
        .map(OsString::from)
        .context("config path has no file name")?;
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res
            && is_relevant(&event, &file_name)
        {
            // Full queue means a re-resolve is already pending.
            let _ = notify_tx.try_send(());
        }
    })?;
    let dir = watch_dir(path);
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    Ok(watcher)
}

impl AsyncEventSource for ConfigWatchSource {
    fn name(&self) -> &'static str {
        "config_watch"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let resolver = self.resolver;
        tokio::spawn(async move {
            let (notify_tx, mut notify_rx) = mpsc::channel::<()>(WATCH_QUEUE_CAP);
            let _watcher = match start_watcher(resolver.path(), notify_tx) {
                Ok(w) => w,
                Err(e) => {
                    warn!(target: "config", error = %e, "config_watch_unavailable");
                    return;
                }
            };
            info!(target: "config", path = %resolver.path().display(), "config_watch_started");

            let mut current = resolver.resolve();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    note = notify_rx.recv() => {
                        if note.is_none() {
                            break;
                        }
                    }
                }

                let next = resolver.resolve();
                let sections = changed_sections(&current, &next);
                current = next;
                if sections.is_empty() {
                    debug!(target: "config", "config_watch_no_section_change");
                    continue;
                }
                for section in sections {
                    debug!(target: "config", section = section.name(), "config_section_changed");
                    if tx
                        .send(Event::Host(HostEvent::ConfigChanged(section)))
                        .await
                        .is_err()
                    {
                        CHANNEL_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    CONFIG_WATCH_NOTIFICATIONS.fetch_add(1, Ordering::Relaxed);
                }
            }
            debug!(target: "config", "config_watch_stopped");
        })
    }
}
