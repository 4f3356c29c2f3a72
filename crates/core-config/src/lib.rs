//! Configuration snapshot and resolvers.
//!
//! The switcher never caches configuration: every decision point calls
//! [`ConfigResolver::resolve`] and works against the snapshot it gets back, so
//! edits to `imswitch.toml` take effect on the very next event. Resolution
//! cannot fail. A missing or malformed file resolves to `Config::default()`,
//! whose `enable = false` turns every handler into a no-op.
//!
//! The TOML layout mirrors the host editor's settings namespaces:
//!
//! ```toml
//! [vim.autoSwitchInputMethod]
//! enable = true
//! defaultIM = "com.apple.keylayout.ABC"
//! obtainIMCmd = "im-select"
//! switchIMCmd = "im-select {im}"
//!
//! [vim.cursorStylePerMode]
//! normal = "block"
//! insert = "line"
//! ```
//!
//! Unknown fields are ignored so host-side settings can grow without warnings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{fs, io};
use tracing::{debug, warn};

/// Dotted name of the section whose edits force an immediate switch.
pub const AUTO_SWITCH_SECTION: &str = "vim.autoSwitchInputMethod";
/// Dotted name of the cursor style mapping section.
pub const CURSOR_STYLE_SECTION: &str = "vim.cursorStylePerMode";
/// Placeholder substituted with `defaultIM` inside `switchIMCmd`.
pub const IM_PLACEHOLDER: &str = "{im}";

const CONFIG_FILE_NAME: &str = "imswitch.toml";

/// Rendered caret shape reported by the host editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorStyle {
    Line,
    Block,
    Underline,
    LineThin,
    BlockOutline,
    UnderlineThin,
}

impl CursorStyle {
    pub const ALL: [CursorStyle; 6] = [
        CursorStyle::Line,
        CursorStyle::Block,
        CursorStyle::Underline,
        CursorStyle::LineThin,
        CursorStyle::BlockOutline,
        CursorStyle::UnderlineThin,
    ];

    /// Look up a style by its settings name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "line" => Some(CursorStyle::Line),
            "block" => Some(CursorStyle::Block),
            "underline" => Some(CursorStyle::Underline),
            "line-thin" => Some(CursorStyle::LineThin),
            "block-outline" => Some(CursorStyle::BlockOutline),
            "underline-thin" => Some(CursorStyle::UnderlineThin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CursorStyle::Line => "line",
            CursorStyle::Block => "block",
            CursorStyle::Underline => "underline",
            CursorStyle::LineThin => "line-thin",
            CursorStyle::BlockOutline => "block-outline",
            CursorStyle::UnderlineThin => "underline-thin",
        }
    }
}

/// Resolved Normal / Insert cursor shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCursorStyles {
    pub normal: CursorStyle,
    pub insert: CursorStyle,
}

impl Default for ModeCursorStyles {
    fn default() -> Self {
        Self {
            normal: CursorStyle::Block,
            insert: CursorStyle::Line,
        }
    }
}

/// What an active-editor change does once an editor with a document is focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusPolicy {
    /// Switch on every editor focus-in.
    #[default]
    Always,
    /// Switch only when the focused editor reports a Normal-mode cursor.
    NormalCursor,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct AutoSwitchSection {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "defaultIM")]
    pub default_im: String,
    #[serde(default, rename = "obtainIMCmd")]
    pub obtain_im_cmd: String,
    #[serde(default, rename = "switchIMCmd")]
    pub switch_im_cmd: String,
    #[serde(default, rename = "editorFocusPolicy")]
    pub editor_focus_policy: FocusPolicy,
}

// Kept as raw strings: an unrecognised style name falls back per field instead
// of failing the whole file.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct CursorStylePerMode {
    #[serde(default)]
    pub normal: Option<String>,
    #[serde(default)]
    pub insert: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct VimSection {
    #[serde(default, rename = "autoSwitchInputMethod")]
    pub auto_switch: AutoSwitchSection,
    #[serde(default, rename = "cursorStylePerMode")]
    pub cursor_style_per_mode: CursorStylePerMode,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub vim: VimSection,
}

/// Immutable configuration snapshot handed to every decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(rename = "defaultIM")]
    pub default_im: String,
    #[serde(rename = "obtainIMCmd")]
    pub obtain_im_cmd: String,
    #[serde(rename = "switchIMCmd")]
    pub switch_im_cmd: String,
    pub enable: bool,
    pub normal_cursor_style: Option<String>,
    pub insert_cursor_style: Option<String>,
    pub editor_focus_policy: FocusPolicy,
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let VimSection {
            auto_switch,
            cursor_style_per_mode,
        } = file.vim;
        Self {
            default_im: auto_switch.default_im,
            obtain_im_cmd: auto_switch.obtain_im_cmd,
            switch_im_cmd: auto_switch.switch_im_cmd,
            enable: auto_switch.enable,
            normal_cursor_style: cursor_style_per_mode.normal,
            insert_cursor_style: cursor_style_per_mode.insert,
            editor_focus_policy: auto_switch.editor_focus_policy,
        }
    }
}

impl Config {
    /// Normal / Insert styles with the Block / Line fallback applied whenever a
    /// field is unset or names no known style.
    pub fn cursor_styles(&self) -> ModeCursorStyles {
        let fallback = ModeCursorStyles::default();
        ModeCursorStyles {
            normal: self
                .normal_cursor_style
                .as_deref()
                .and_then(CursorStyle::parse)
                .unwrap_or(fallback.normal),
            insert: self
                .insert_cursor_style
                .as_deref()
                .and_then(CursorStyle::parse)
                .unwrap_or(fallback.insert),
        }
    }

    /// The `vim.autoSwitchInputMethod` portion of the snapshot, used to tell
    /// whether an edit touched that section.
    pub fn auto_switch_section(&self) -> AutoSwitchSection {
        AutoSwitchSection {
            enable: self.enable,
            default_im: self.default_im.clone(),
            obtain_im_cmd: self.obtain_im_cmd.clone(),
            switch_im_cmd: self.switch_im_cmd.clone(),
            editor_focus_policy: self.editor_focus_policy,
        }
    }

    pub fn cursor_style_section(&self) -> CursorStylePerMode {
        CursorStylePerMode {
            normal: self.normal_cursor_style.clone(),
            insert: self.insert_cursor_style.clone(),
        }
    }
}

/// Source of configuration snapshots.
pub trait ConfigResolver: Send + Sync {
    /// Produce a fresh snapshot. Never fails; problems resolve to defaults.
    fn resolve(&self) -> Config;
}

impl<T: ConfigResolver + ?Sized> ConfigResolver for std::sync::Arc<T> {
    fn resolve(&self) -> Config {
        (**self).resolve()
    }
}

/// Reads and parses the TOML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigResolver {
    path: PathBuf,
}

impl FileConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolver for the discovered default location (see [`discover`]).
    pub fn discovered() -> Self {
        Self::new(discover())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigResolver for FileConfigResolver {
    fn resolve(&self) -> Config {
        load_from(&self.path)
    }
}

/// In-memory snapshot that callers can replace at any time.
#[derive(Debug, Default)]
pub struct StaticConfigResolver {
    current: Mutex<Config>,
}

impl StaticConfigResolver {
    pub fn new(config: Config) -> Self {
        Self {
            current: Mutex::new(config),
        }
    }

    pub fn set(&self, config: Config) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    /// Apply an in-place edit to the held snapshot.
    pub fn update(&self, edit: impl FnOnce(&mut Config)) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        edit(&mut guard);
    }
}

impl ConfigResolver for StaticConfigResolver {
    fn resolve(&self) -> Config {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Best-effort config path: local `imswitch.toml` first, then the platform
/// config dir (XDG / AppData Roaming / Application Support).
pub fn discover() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("imswitch").join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

/// Parse TOML text into a snapshot.
pub fn parse(content: &str) -> Result<Config> {
    let file = toml::from_str::<ConfigFile>(content)?;
    Ok(Config::from(file))
}

/// Read `path` and parse it, falling back to defaults on any failure.
pub fn load_from(path: &Path) -> Config {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(target: "config", path = %path.display(), "config_file_missing");
            return Config::default();
        }
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_read_failed");
            return Config::default();
        }
    };
    match parse(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    const FULL: &str = r#"
[vim.autoSwitchInputMethod]
enable = true
defaultIM = "com.apple.keylayout.ABC"
obtainIMCmd = "im-select"
switchIMCmd = "im-select {im}"

[vim.cursorStylePerMode]
normal = "block-outline"
insert = "line-thin"
"#;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Path::new("__nonexistent_hopefully__.toml"));
        assert_eq!(cfg, Config::default());
        assert!(!cfg.enable);
        assert!(cfg.switch_im_cmd.is_empty());
    }

    #[test]
    fn parses_all_auto_switch_fields() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), FULL).unwrap();
        let cfg = load_from(tmp.path());
        assert!(cfg.enable);
        assert_eq!(cfg.default_im, "com.apple.keylayout.ABC");
        assert_eq!(cfg.obtain_im_cmd, "im-select");
        assert_eq!(cfg.switch_im_cmd, "im-select {im}");
        assert_eq!(cfg.editor_focus_policy, FocusPolicy::Always);
        assert_eq!(
            cfg.cursor_styles(),
            ModeCursorStyles {
                normal: CursorStyle::BlockOutline,
                insert: CursorStyle::LineThin,
            }
        );
    }

    #[test]
    fn cursor_styles_fall_back_when_unset_or_unknown() {
        let unset = Config::default();
        assert_eq!(unset.cursor_styles(), ModeCursorStyles::default());

        let unknown = Config {
            normal_cursor_style: Some("hexagon".into()),
            insert_cursor_style: Some("underline".into()),
            ..Config::default()
        };
        let styles = unknown.cursor_styles();
        assert_eq!(styles.normal, CursorStyle::Block);
        assert_eq!(styles.insert, CursorStyle::Underline);
    }

    #[test]
    fn cursor_style_names_round_trip() {
        for style in CursorStyle::ALL {
            assert_eq!(CursorStyle::parse(style.as_str()), Some(style));
        }
        assert_eq!(CursorStyle::parse("Block"), None);
    }

    #[test]
    fn focus_policy_parses_kebab_case() {
        let cfg = parse(
            "[vim.autoSwitchInputMethod]\nenable = true\neditorFocusPolicy = \"normal-cursor\"\n",
        )
        .unwrap();
        assert_eq!(cfg.editor_focus_policy, FocusPolicy::NormalCursor);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = parse("[vim]\nleader = \"space\"\n[vim.autoSwitchInputMethod]\nenable = true\n")
            .unwrap();
        assert!(cfg.enable);
    }

    #[test]
    fn file_resolver_rereads_on_every_call() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[vim.autoSwitchInputMethod]\nenable = false\n").unwrap();
        let resolver = FileConfigResolver::new(tmp.path());
        assert!(!resolver.resolve().enable);
        std::fs::write(tmp.path(), "[vim.autoSwitchInputMethod]\nenable = true\n").unwrap();
        assert!(resolver.resolve().enable);
    }

    #[test]
    fn static_resolver_reflects_updates() {
        let resolver = StaticConfigResolver::default();
        assert!(!resolver.resolve().enable);
        resolver.update(|cfg| cfg.enable = true);
        assert!(resolver.resolve().enable);
        resolver.set(Config::default());
        assert!(!resolver.resolve().enable);
    }

    #[test]
    fn section_views_split_the_snapshot() {
        let cfg = parse(FULL).unwrap();
        let section = cfg.auto_switch_section();
        assert_eq!(section.default_im, "com.apple.keylayout.ABC");
        assert!(section.enable);
        assert_eq!(
            cfg.cursor_style_section().normal.as_deref(),
            Some("block-outline")
        );
    }

    #[test]
    fn parse_failure_logs_under_config_target_and_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[vim.autoSwitchInputMethod\nenable = ").unwrap();
        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        let cfg = with_default(subscriber, || load_from(tmp.path()));

        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("WARN config:"));
        assert!(log_output.contains("config_parse_failed"));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn dump_uses_host_key_names() {
        let cfg = parse(FULL).unwrap();
        let rendered = toml::to_string(&cfg.auto_switch_section()).unwrap();
        assert!(rendered.contains("defaultIM"));
        assert!(rendered.contains("switchIMCmd"));
    }
}
