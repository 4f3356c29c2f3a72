//! Line-oriented JSON host protocol.
//!
//! Inbound: one object per line, tagged by `"event"`:
//!
//! ```text
//! {"event":"cursorStyle","style":"block"}
//! {"event":"activeEditor","editor":{"document":"/src/a.rs","languageId":"rust","cursorStyle":"block"}}
//! {"event":"windowFocus","focused":true,"activeDocument":true}
//! {"event":"configChanged","section":"vim.autoSwitchInputMethod"}
//! {"event":"command","action":"switch"}
//! {"event":"shutdown"}
//! ```
//!
//! Outbound: notifications as `{"kind":"info"|"error","message":"..."}`.

use core_config::CursorStyle;
use core_events::{CommandEvent, ConfigSection, EditorInfo, Event, HostEvent};
use core_switcher::{Notification, Notifier};
use serde::Deserialize;
use std::io::{self, Write};
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostMessage {
    CursorStyle {
        #[serde(default)]
        style: Option<String>,
    },
    ActiveEditor {
        #[serde(default)]
        editor: Option<EditorMessage>,
    },
    WindowFocus {
        focused: bool,
        #[serde(default, rename = "activeDocument")]
        active_document: bool,
    },
    ConfigChanged {
        section: String,
    },
    Command {
        action: ActionName,
    },
    Shutdown,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditorMessage {
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub cursor_style: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActionName {
    Switch,
    Query,
    DumpConfig,
    ShowLog,
}

impl From<ActionName> for CommandEvent {
    fn from(action: ActionName) -> Self {
        match action {
            ActionName::Switch => CommandEvent::SwitchInputMethod,
            ActionName::Query => CommandEvent::QueryInputMethod,
            ActionName::DumpConfig => CommandEvent::DumpConfig,
            ActionName::ShowLog => CommandEvent::ShowLog,
        }
    }
}

fn parse_style(raw: Option<String>) -> Option<CursorStyle> {
    let raw = raw?;
    let parsed = CursorStyle::parse(&raw);
    if parsed.is_none() {
        warn!(target: "input.protocol", style = %raw, "unknown_cursor_style");
    }
    parsed
}

impl HostMessage {
    pub fn into_event(self) -> Event {
        match self {
            HostMessage::CursorStyle { style } => {
                Event::Host(HostEvent::CursorStyleChanged(parse_style(style)))
            }
            HostMessage::ActiveEditor { editor } => {
                Event::Host(HostEvent::ActiveEditorChanged(editor.map(|e| EditorInfo {
                    document: e.document,
                    language_id: e.language_id,
                    cursor_style: parse_style(e.cursor_style),
                })))
            }
            HostMessage::WindowFocus {
                focused,
                active_document,
            } => Event::Host(HostEvent::WindowFocusChanged {
                focused,
                active_document,
            }),
            HostMessage::ConfigChanged { section } => {
                Event::Host(HostEvent::ConfigChanged(ConfigSection::from_name(&section)))
            }
            HostMessage::Command { action } => Event::Command(action.into()),
            HostMessage::Shutdown => Event::Shutdown,
        }
    }
}

/// Parse one protocol line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Event>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let message: HostMessage = serde_json::from_str(trimmed)?;
    debug!(target: "input.protocol", ?message, "host_message");
    Ok(Some(message.into_event()))
}

/// Encode a notification as one protocol line (without the newline).
pub fn encode_notification(notification: &Notification) -> Result<String, serde_json::Error> {
    serde_json::to_string(notification)
}

/// Writes notifications to stdout, one JSON object per line.
#[derive(Debug, Default, Clone)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, notification: Notification) {
        let line = match encode_notification(&notification) {
            Ok(line) => line,
            Err(e) => {
                warn!(target: "input.protocol", error = %e, "notification_encode_failed");
                return;
            }
        };
        let mut out = io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(target: "input.protocol", error = %e, "notification_write_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_cursor_style_events() {
        assert_eq!(
            parse_line(r#"{"event":"cursorStyle","style":"block-outline"}"#).unwrap(),
            Some(Event::Host(HostEvent::CursorStyleChanged(Some(
                CursorStyle::BlockOutline
            ))))
        );
        assert_eq!(
            parse_line(r#"{"event":"cursorStyle"}"#).unwrap(),
            Some(Event::Host(HostEvent::CursorStyleChanged(None)))
        );
        assert_eq!(
            parse_line(r#"{"event":"cursorStyle","style":"triangle"}"#).unwrap(),
            Some(Event::Host(HostEvent::CursorStyleChanged(None)))
        );
    }

    #[test]
    fn parses_active_editor_events() {
        let ev = parse_line(
            r#"{"event":"activeEditor","editor":{"document":"/a.rs","languageId":"rust","cursorStyle":"line"}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            Some(Event::Host(HostEvent::ActiveEditorChanged(Some(EditorInfo {
                document: Some("/a.rs".into()),
                language_id: Some("rust".into()),
                cursor_style: Some(CursorStyle::Line),
            }))))
        );
        assert_eq!(
            parse_line(r#"{"event":"activeEditor","editor":null}"#).unwrap(),
            Some(Event::Host(HostEvent::ActiveEditorChanged(None)))
        );
    }

    #[test]
    fn parses_focus_config_command_and_shutdown() {
        assert_eq!(
            parse_line(r#"{"event":"windowFocus","focused":true,"activeDocument":true}"#).unwrap(),
            Some(Event::Host(HostEvent::WindowFocusChanged {
                focused: true,
                active_document: true,
            }))
        );
        assert_eq!(
            parse_line(r#"{"event":"windowFocus","focused":false}"#).unwrap(),
            Some(Event::Host(HostEvent::WindowFocusChanged {
                focused: false,
                active_document: false,
            }))
        );
        assert_eq!(
            parse_line(r#"{"event":"configChanged","section":"vim.autoSwitchInputMethod"}"#)
                .unwrap(),
            Some(Event::Host(HostEvent::ConfigChanged(ConfigSection::AutoSwitch)))
        );
        assert_eq!(
            parse_line(r#"{"event":"command","action":"dumpConfig"}"#).unwrap(),
            Some(Event::Command(CommandEvent::DumpConfig))
        );
        assert_eq!(
            parse_line(r#"{"event":"shutdown"}"#).unwrap(),
            Some(Event::Shutdown)
        );
    }

    #[test]
    fn blank_lines_are_skipped_and_garbage_errors() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"event":"teleport"}"#).is_err());
        assert!(parse_line(r#"{"event":"command","action":"explode"}"#).is_err());
    }

    #[test]
    fn notifications_encode_as_single_line_json() {
        let line = encode_notification(&Notification::error("Failed to switch input method: x"))
            .unwrap();
        assert_eq!(
            line,
            r#"{"kind":"error","message":"Failed to switch input method: x"}"#
        );
        assert!(!line.contains('\n'));
    }
}
