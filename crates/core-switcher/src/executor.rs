//! Command-issuing half of the switcher: the switch action, the current-IM
//! query and the manual actions. Cheap to clone so switch runs can be spawned
//! as independent tasks.

use crate::notify::{Notification, Notifier};
use crate::{SwitchError, SwitchOrigin, is_normal_style};
use core_config::{Config, ConfigResolver, CursorStyle, IM_PLACEHOLDER};
use core_events::CommandEvent;
use core_exec::{CommandOutput, CommandRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Result of a switch command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    /// The exact string handed to the shell.
    pub command: String,
    pub output: CommandOutput,
}

/// Substitute the first `{im}` in `template` with `im`.
pub fn render_switch_command(template: &str, im: &str) -> String {
    template.replacen(IM_PLACEHOLDER, im, 1)
}

fn missing_switch_fields(config: &Config) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if config.switch_im_cmd.is_empty() {
        missing.push("switchIMCmd");
    }
    if config.default_im.is_empty() {
        missing.push("defaultIM");
    }
    missing
}

#[derive(Clone)]
pub struct SwitchExecutor {
    resolver: Arc<dyn ConfigResolver>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
    log_path: Option<PathBuf>,
}

impl SwitchExecutor {
    pub fn new(
        resolver: Arc<dyn ConfigResolver>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver,
            runner,
            notifier,
            log_path: None,
        }
    }

    /// Path reported by the show-log action.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Fresh configuration snapshot.
    pub fn resolve(&self) -> Config {
        self.resolver.resolve()
    }

    /// Whether `style` is the Normal-mode cursor under the current configuration.
    pub fn is_normal_mode(&self, style: CursorStyle) -> bool {
        is_normal_style(&self.resolve(), style)
    }

    /// Run the configured switch command with `{im}` replaced by `defaultIM`.
    ///
    /// Stderr output is logged as a warning but does not fail the switch.
    /// Execution failures notify the user only for [`SwitchOrigin::Manual`].
    pub async fn switch_input_method(
        &self,
        origin: SwitchOrigin,
    ) -> Result<SwitchReport, SwitchError> {
        let config = self.resolve();
        if !config.enable {
            info!(target: "switcher.switch", origin = origin.as_str(), "switching_disabled");
            return Err(SwitchError::Disabled);
        }

        let missing = missing_switch_fields(&config);
        if !missing.is_empty() {
            info!(
                target: "switcher.switch",
                origin = origin.as_str(),
                missing = %missing.join(", "),
                "switch_config_incomplete"
            );
            return Err(SwitchError::ConfigurationIncomplete { missing });
        }

        let command = render_switch_command(&config.switch_im_cmd, &config.default_im);
        info!(target: "switcher.switch", origin = origin.as_str(), command = %command, "executing_switch_command");

        match self.runner.run(&command).await {
            Ok(output) => {
                if output.has_stderr() {
                    warn!(target: "switcher.switch", stderr = %output.stderr, "switch_command_stderr");
                } else {
                    info!(target: "switcher.switch", stdout = %output.stdout, "switch_command_succeeded");
                }
                Ok(SwitchReport { command, output })
            }
            Err(e) => {
                error!(target: "switcher.switch", origin = origin.as_str(), error = %e, "switch_command_failed");
                if origin == SwitchOrigin::Manual {
                    self.notifier.notify(Notification::error(format!(
                        "Failed to switch input method: {e}"
                    )));
                }
                Err(SwitchError::Exec(e))
            }
        }
    }

    /// Spawn a switch run as its own task. Overlapping runs are not coalesced.
    pub fn spawn_switch(&self, origin: SwitchOrigin) -> JoinHandle<()> {
        let exec = self.clone();
        tokio::spawn(async move {
            // Outcome already logged inside; nothing propagates to the host.
            let _ = exec.switch_input_method(origin).await;
        })
    }

    /// Run `obtainIMCmd` and return its trimmed stdout.
    ///
    /// Unlike the switch path, any stderr output counts as failure here.
    pub async fn get_current_input_method(&self) -> Option<String> {
        let config = self.resolve();
        if config.obtain_im_cmd.is_empty() {
            info!(target: "switcher.query", missing = "obtainIMCmd", "query_config_incomplete");
            return None;
        }

        match self.runner.run(&config.obtain_im_cmd).await {
            Ok(output) if output.has_stderr() => {
                warn!(target: "switcher.query", stderr = %output.stderr, "query_command_stderr");
                None
            }
            Ok(output) => {
                let current = output.stdout.trim().to_string();
                info!(target: "switcher.query", current = %current, "current_input_method");
                Some(current)
            }
            Err(e) => {
                error!(target: "switcher.query", error = %e, "query_command_failed");
                None
            }
        }
    }

    /// Execute one of the manual actions from the host's command surface.
    pub async fn run_action(&self, action: CommandEvent) {
        info!(target: "switcher.action", action = action.as_str(), "manual_action_triggered");
        match action {
            CommandEvent::SwitchInputMethod => {
                let _ = self.switch_input_method(SwitchOrigin::Manual).await;
            }
            CommandEvent::QueryInputMethod => {
                if let Some(current) = self.get_current_input_method().await {
                    self.notifier.notify(Notification::info(format!(
                        "Current input method: {current}"
                    )));
                }
            }
            CommandEvent::DumpConfig => match serde_json::to_string_pretty(&self.resolve()) {
                Ok(dump) => self
                    .notifier
                    .notify(Notification::info(format!("Vim Config: {dump}"))),
                Err(e) => error!(target: "switcher.action", error = %e, "config_dump_failed"),
            },
            CommandEvent::ShowLog => {
                let message = match &self.log_path {
                    Some(path) => format!("Log file: {}", path.display()),
                    None => "Logging to file is disabled".to_string(),
                };
                self.notifier.notify(Notification::info(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn substitutes_placeholder_once() {
        assert_eq!(
            render_switch_command("im-select {im}", "com.apple.keylayout.ABC"),
            "im-select com.apple.keylayout.ABC"
        );
        assert_eq!(
            render_switch_command("switch {im} && echo {im}", "us"),
            "switch us && echo {im}"
        );
        assert_eq!(render_switch_command("xkb-switch -s us", "de"), "xkb-switch -s us");
    }

    #[test]
    fn missing_fields_are_named_individually() {
        let mut cfg = Config::default();
        assert_eq!(missing_switch_fields(&cfg), vec!["switchIMCmd", "defaultIM"]);
        cfg.switch_im_cmd = "im-select {im}".into();
        assert_eq!(missing_switch_fields(&cfg), vec!["defaultIM"]);
        cfg.default_im = "us".into();
        assert!(missing_switch_fields(&cfg).is_empty());
    }
}
