//! Mode-driven input method switcher.
//!
//! The host never tells us the modal editor's real mode, only the cursor shape
//! it renders. [`ModeSwitcher`] classifies each reported shape as Normal or
//! not against the current configuration and asks for a switch back to the
//! default input method when Normal mode is entered. Editor focus, window
//! focus and configuration edits can request a switch as well.
//!
//! Handlers are synchronous decisions returning a [`Trigger`]; the runtime
//! turns `Trigger::Switch` into a spawned [`SwitchExecutor::switch_input_method`]
//! run. All handlers stay silent when `enable` is false.

mod executor;
mod notify;

pub use executor::{SwitchExecutor, SwitchReport, render_switch_command};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier};

use core_config::{Config, CursorStyle, FocusPolicy};
use core_events::{ConfigSection, EditorInfo, HostEvent};
use core_exec::ExecError;
use thiserror::Error;
use tracing::{debug, info};

/// Why a switch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchOrigin {
    CursorStyle,
    ActiveEditor,
    WindowFocus,
    ConfigChange,
    Manual,
}

impl SwitchOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchOrigin::CursorStyle => "cursor_style",
            SwitchOrigin::ActiveEditor => "active_editor",
            SwitchOrigin::WindowFocus => "window_focus",
            SwitchOrigin::ConfigChange => "config_change",
            SwitchOrigin::Manual => "manual",
        }
    }
}

/// Decision produced by an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    None,
    Switch(SwitchOrigin),
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("input method switching is disabled")]
    Disabled,

    #[error("missing configuration: {}", .missing.join(", "))]
    ConfigurationIncomplete { missing: Vec<&'static str> },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// True iff `style` is the Normal-mode cursor under `config`'s mapping
/// (Block when unset or unrecognised).
pub fn is_normal_style(config: &Config, style: CursorStyle) -> bool {
    style == config.cursor_styles().normal
}

/// Mutable switcher state. Only the cursor-style handler writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeState {
    pub last_cursor_style: Option<CursorStyle>,
}

/// Owns the mode state and maps host events to switch decisions.
pub struct ModeSwitcher {
    state: ModeState,
    exec: SwitchExecutor,
}

impl ModeSwitcher {
    pub fn new(exec: SwitchExecutor) -> Self {
        Self {
            state: ModeState::default(),
            exec,
        }
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn executor(&self) -> &SwitchExecutor {
        &self.exec
    }

    /// See [`SwitchExecutor::is_normal_mode`].
    pub fn is_normal_mode(&self, style: CursorStyle) -> bool {
        self.exec.is_normal_mode(style)
    }

    /// Route a host event to its handler.
    pub fn handle(&mut self, event: &HostEvent) -> Trigger {
        match event {
            HostEvent::CursorStyleChanged(style) => self.on_cursor_style_changed(*style),
            HostEvent::ActiveEditorChanged(editor) => self.on_active_editor_changed(editor.as_ref()),
            HostEvent::WindowFocusChanged {
                focused,
                active_document,
            } => self.on_window_focus_changed(*focused, *active_document),
            HostEvent::ConfigChanged(section) => self.on_config_changed(section),
        }
    }

    /// Editor options changed. Only a style different from the last observed
    /// one is considered; the last style is updated whichever way the
    /// classification goes.
    pub fn on_cursor_style_changed(&mut self, style: Option<CursorStyle>) -> Trigger {
        if !self.exec.resolve().enable {
            return Trigger::None;
        }
        let Some(style) = style else {
            return Trigger::None;
        };
        if self.state.last_cursor_style == Some(style) {
            return Trigger::None;
        }

        info!(
            target: "switcher.cursor",
            from = self.state.last_cursor_style.map(|s| s.as_str()),
            to = style.as_str(),
            "cursor_style_changed"
        );
        let trigger = if self.is_normal_mode(style) {
            info!(target: "switcher.cursor", style = style.as_str(), "normal_mode_detected");
            Trigger::Switch(SwitchOrigin::CursorStyle)
        } else {
            info!(target: "switcher.cursor", style = style.as_str(), "non_normal_mode_no_switch");
            Trigger::None
        };
        self.state.last_cursor_style = Some(style);
        trigger
    }

    /// A different text editor became active.
    pub fn on_active_editor_changed(&self, editor: Option<&EditorInfo>) -> Trigger {
        let config = self.exec.resolve();
        if !config.enable {
            return Trigger::None;
        }
        info!(
            target: "switcher.focus",
            editor_present = editor.is_some(),
            "active_editor_changed"
        );
        let Some(editor) = editor.filter(|e| e.has_document()) else {
            return Trigger::None;
        };
        debug!(
            target: "switcher.focus",
            document = editor.document.as_deref(),
            language = editor.language_id.as_deref(),
            "editor_focused"
        );

        match config.editor_focus_policy {
            FocusPolicy::Always => Trigger::Switch(SwitchOrigin::ActiveEditor),
            FocusPolicy::NormalCursor => {
                if editor
                    .cursor_style
                    .is_some_and(|style| self.is_normal_mode(style))
                {
                    info!(target: "switcher.focus", "editor_focused_in_normal_mode");
                    Trigger::Switch(SwitchOrigin::ActiveEditor)
                } else {
                    info!(target: "switcher.focus", "editor_focused_not_normal_mode");
                    Trigger::None
                }
            }
        }
    }

    /// The host window gained or lost focus.
    pub fn on_window_focus_changed(&self, focused: bool, active_document: bool) -> Trigger {
        if !self.exec.resolve().enable || !focused {
            return Trigger::None;
        }
        info!(target: "switcher.focus", active_document, "window_focused");
        if active_document {
            Trigger::Switch(SwitchOrigin::WindowFocus)
        } else {
            Trigger::None
        }
    }

    /// A configuration section changed. Only `vim.autoSwitchInputMethod` edits
    /// force a switch, and only when the new snapshot is enabled.
    pub fn on_config_changed(&self, section: &ConfigSection) -> Trigger {
        if *section != ConfigSection::AutoSwitch {
            debug!(target: "switcher.config", section = section.name(), "unwatched_section_changed");
            return Trigger::None;
        }
        let config = self.exec.resolve();
        if !config.enable {
            return Trigger::None;
        }
        info!(target: "switcher.config", section = section.name(), "auto_switch_config_changed");
        Trigger::Switch(SwitchOrigin::ConfigChange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(normal: &str, insert: &str) -> Config {
        Config {
            normal_cursor_style: Some(normal.into()),
            insert_cursor_style: Some(insert.into()),
            ..Config::default()
        }
    }

    #[test]
    fn normal_style_follows_mapping() {
        let cfg = mapped("block", "line");
        assert!(is_normal_style(&cfg, CursorStyle::Block));
        assert!(!is_normal_style(&cfg, CursorStyle::Line));
        assert!(!is_normal_style(&cfg, CursorStyle::Underline));

        let custom = mapped("underline", "line-thin");
        assert!(is_normal_style(&custom, CursorStyle::Underline));
        assert!(!is_normal_style(&custom, CursorStyle::Block));
    }

    #[test]
    fn unmapped_normal_falls_back_to_block() {
        assert!(is_normal_style(&Config::default(), CursorStyle::Block));
        assert!(is_normal_style(
            &mapped("not-a-style", "line"),
            CursorStyle::Block
        ));
    }

    #[test]
    fn error_messages_name_missing_fields() {
        let err = SwitchError::ConfigurationIncomplete {
            missing: vec!["switchIMCmd", "defaultIM"],
        };
        assert_eq!(
            err.to_string(),
            "missing configuration: switchIMCmd, defaultIM"
        );
    }
}
