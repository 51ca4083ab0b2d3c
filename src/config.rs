//! Configuration model.
//!
//! Parses the TOML configuration into typed structures exactly once; the
//! rest of the engine works with closed enums and resolved options, never
//! with raw tables. Also hosts the external context-source loader and the
//! path expansion rule shared by every action.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration file contents.
///
/// Everything under `[context.*]` seeds the shared context store; every
/// entry under `[module.*]` describes one module. Declaration order is
/// preserved and is load-bearing: modules start up and exit in the order
/// they appear.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Engine-wide settings.
    pub general: GeneralConfig,
    /// Static context sections inserted into the store before any module runs.
    pub context: toml::Table,
    /// One entry per module, in declaration order.
    #[serde(rename = "module")]
    pub modules: toml::Table,
}

impl RawConfig {
    /// Read and parse a configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration file contents.
    pub fn parse(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str(content)?)
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default number of seconds to wait for `run` commands.
    pub run_timeout: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { run_timeout: 2.0 }
    }
}

impl GeneralConfig {
    /// The default run timeout as a duration.
    #[must_use]
    pub fn run_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.run_timeout.max(0.0))
    }
}

/// Configuration of one module.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Disabled modules are skipped entirely at construction.
    pub enabled: bool,
    /// The timer deciding this module's periods.
    pub timer: TimerConfig,
    /// Named template declarations, referenced from `compile` entries.
    pub templates: BTreeMap<String, TemplateConfig>,
    /// Actions run once when the engine starts.
    pub on_startup: BlockConfig,
    /// Actions run whenever the timer's period changes.
    pub on_period_change: BlockConfig,
    /// Actions run once at shutdown.
    pub on_exit: BlockConfig,
    /// Actions run when a watched path is modified, keyed by path.
    pub on_modified: BTreeMap<String, BlockConfig>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timer: TimerConfig::default(),
            templates: BTreeMap::new(),
            on_startup: BlockConfig::default(),
            on_period_change: BlockConfig::default(),
            on_exit: BlockConfig::default(),
            on_modified: BTreeMap::new(),
        }
    }
}

/// Timer variant selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TimerConfig {
    /// One constant period.
    Static {
        /// Optional custom period label.
        #[serde(default)]
        period: Option<String>,
    },
    /// Lowercase local weekday names.
    Weekday,
    /// Solar phases at a fixed location.
    Solar {
        /// Degrees north.
        latitude: f64,
        /// Degrees east.
        longitude: f64,
        /// Meters above sea level.
        #[serde(default)]
        elevation: f64,
    },
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::Static { period: None }
    }
}

/// A named template declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateConfig {
    /// Template source path, relative to the module directory.
    pub source: String,
    /// Compile target; a persisted temp file is allocated when omitted.
    #[serde(default)]
    pub target: Option<String>,
    /// Octal permission bits applied to the target, e.g. `"755"`.
    #[serde(default)]
    pub permissions: Option<String>,
}

/// The raw contents of one lifecycle block.
///
/// Every field accepts either a single entry or a list of entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Context imports.
    pub import_context: Option<OneOrMany<ImportContextConfig>>,
    /// Template compilations.
    pub compile: Option<OneOrMany<CompileEntry>>,
    /// Shell commands.
    pub run: Option<OneOrMany<RunEntry>>,
    /// Trigger emissions.
    pub trigger: Option<OneOrMany<TriggerEntry>>,
}

impl BlockConfig {
    /// Normalized context-import entries.
    #[must_use]
    pub fn import_context_entries(&self) -> Vec<ImportContextConfig> {
        self.import_context
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Normalized compile entries.
    #[must_use]
    pub fn compile_entries(&self) -> Vec<CompileEntry> {
        self.compile
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Normalized run entries.
    #[must_use]
    pub fn run_entries(&self) -> Vec<RunEntry> {
        self.run.clone().map(OneOrMany::into_vec).unwrap_or_default()
    }

    /// Normalized trigger entries.
    #[must_use]
    pub fn trigger_entries(&self) -> Vec<TriggerEntry> {
        self.trigger
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// True when the block configures nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.import_context.is_none()
            && self.compile.is_none()
            && self.run.is_none()
            && self.trigger.is_none()
    }
}

/// A single configuration value or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A bare entry.
    One(T),
    /// A list of entries.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Normalize to a sequence.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// Configuration of one `import_context` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportContextConfig {
    /// File to import, relative to the module directory.
    pub from_path: String,
    /// Section within the file; the whole file when omitted.
    #[serde(default)]
    pub from_section: Option<String>,
    /// Store section to merge into; the store root when omitted.
    #[serde(default)]
    pub to_section: Option<String>,
}

/// A compile entry: a named template reference or an inline source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CompileEntry {
    /// `"name"` for an own template, `"module.name"` across modules.
    Reference(String),
    /// An inline `{ source, target?, permissions? }` table.
    Inline(CompileConfig),
}

/// Inline compile options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompileConfig {
    /// Template file or directory to compile.
    pub source: String,
    /// Compile target; a persisted temp file is allocated when omitted.
    #[serde(default)]
    pub target: Option<String>,
    /// Octal permission bits applied to the target.
    #[serde(default)]
    pub permissions: Option<String>,
}

/// A run entry: a bare command string or a detailed table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RunEntry {
    /// A bare shell command.
    Command(String),
    /// A `{ shell, timeout? }` table.
    Detailed(RunConfig),
}

/// Detailed run options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// The shell command; an entry without one is a null object.
    pub shell: Option<String>,
    /// Seconds to wait; `0` means fire-and-forget.
    pub timeout: Option<f64>,
}

/// A trigger entry: a bare block name or a detailed table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TriggerEntry {
    /// A bare lifecycle block name such as `"on_startup"`.
    Block(String),
    /// A `{ block, path? }` table.
    Detailed(TriggerConfig),
}

/// Detailed trigger options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Lifecycle block to trigger.
    pub block: Option<String>,
    /// Watched path, required when triggering `on_modified`.
    pub path: Option<String>,
}

/// Load an external context source: a TOML file, optionally narrowed to one
/// top-level section.
pub fn load_context_source(
    path: &Path,
    from_section: Option<&str>,
) -> Result<toml::Table, Error> {
    if !path.is_file() {
        return Err(Error::MissingContextSource(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content)?;
    match from_section {
        None => Ok(table),
        Some(section) => table
            .get(section)
            .and_then(toml::Value::as_table)
            .cloned()
            .ok_or_else(|| Error::MissingContextSection {
                path: path.to_path_buf(),
                section: section.to_string(),
            }),
    }
}

/// Expand a user-supplied path to an absolute one.
///
/// A leading `~` expands to the home directory; relative paths are anchored
/// at `base`.
#[must_use]
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[general]
run_timeout = 5.0

[context.fonts]
mono = "Fira Code"

[module.desktop]
timer = { kind = "solar", latitude = 63.4, longitude = 10.4 }

[module.desktop.templates.bar]
source = "templates/bar.conf"
target = "~/.config/bar/config"

[module.desktop.on_startup]
import_context = { from_path = "colors.toml", to_section = "colors" }
compile = ["bar"]
run = ["echo {period}", { shell = "notify-send up", timeout = 1.5 }]

[module.desktop.on_modified."templates/bar.conf"]
run = "echo recompiled"
trigger = { block = "on_startup" }

[module.sleeper]
enabled = false
"#;

    fn parse_module(config: &RawConfig, name: &str) -> ModuleConfig {
        config
            .modules
            .get(name)
            .unwrap()
            .clone()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        assert_eq!(config.general.run_timeout, 5.0);
        assert_eq!(config.modules.len(), 2);
        assert!(config.context.contains_key("fonts"));
    }

    #[test]
    fn test_enabled_defaults_to_true() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        assert!(parse_module(&config, "desktop").enabled);
        assert!(!parse_module(&config, "sleeper").enabled);
    }

    #[test]
    fn test_timer_defaults_to_static() {
        let config = RawConfig::parse("[module.plain]\n").unwrap();
        let module = parse_module(&config, "plain");
        assert_eq!(module.timer, TimerConfig::Static { period: None });
    }

    #[test]
    fn test_solar_timer_parses_location() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        let module = parse_module(&config, "desktop");
        assert_eq!(
            module.timer,
            TimerConfig::Solar {
                latitude: 63.4,
                longitude: 10.4,
                elevation: 0.0,
            }
        );
    }

    #[test]
    fn test_single_entry_normalizes_to_sequence() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        let module = parse_module(&config, "desktop");
        let imports = module.on_startup.import_context_entries();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].from_path, "colors.toml");
        assert_eq!(imports[0].to_section.as_deref(), Some("colors"));
    }

    #[test]
    fn test_run_entries_accept_string_and_table_forms() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        let module = parse_module(&config, "desktop");
        let runs = module.on_startup.run_entries();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], RunEntry::Command("echo {period}".to_string()));
        assert_eq!(
            runs[1],
            RunEntry::Detailed(RunConfig {
                shell: Some("notify-send up".to_string()),
                timeout: Some(1.5),
            })
        );
    }

    #[test]
    fn test_compile_reference_entry() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        let module = parse_module(&config, "desktop");
        assert_eq!(
            module.on_startup.compile_entries(),
            vec![CompileEntry::Reference("bar".to_string())]
        );
    }

    #[test]
    fn test_on_modified_blocks_are_keyed_by_path() {
        let config = RawConfig::parse(FULL_CONFIG).unwrap();
        let module = parse_module(&config, "desktop");
        let block = module.on_modified.get("templates/bar.conf").unwrap();
        assert_eq!(
            block.run_entries(),
            vec![RunEntry::Command("echo recompiled".to_string())]
        );
        assert_eq!(
            block.trigger_entries(),
            vec![TriggerEntry::Detailed(TriggerConfig {
                block: Some("on_startup".to_string()),
                path: None,
            })]
        );
    }

    #[test]
    fn test_empty_block_reports_empty() {
        let block = BlockConfig::default();
        assert!(block.is_empty());
        assert!(block.run_entries().is_empty());
    }

    #[test]
    fn test_general_defaults() {
        let config = RawConfig::parse("").unwrap();
        assert_eq!(config.general.run_timeout, 2.0);
        assert_eq!(
            config.general.run_timeout_duration(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_reject_invalid_toml() {
        assert!(RawConfig::parse("not toml {{{").is_err());
    }

    #[test]
    fn test_load_context_source_whole_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ctx.toml");
        std::fs::write(&path, "[night]\nprimary = \"dark\"").unwrap();

        let table = load_context_source(&path, None).unwrap();
        assert!(table.contains_key("night"));
    }

    #[test]
    fn test_load_context_source_selects_section() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ctx.toml");
        std::fs::write(&path, "[night]\nprimary = \"dark\"").unwrap();

        let table = load_context_source(&path, Some("night")).unwrap();
        assert_eq!(
            table.get("primary").and_then(toml::Value::as_str),
            Some("dark")
        );
    }

    #[test]
    fn test_load_context_source_missing_file() {
        let err = load_context_source(Path::new("/no/such/file.toml"), None).unwrap_err();
        assert!(matches!(err, Error::MissingContextSource(_)));
    }

    #[test]
    fn test_load_context_source_missing_section() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ctx.toml");
        std::fs::write(&path, "[night]\nprimary = \"dark\"").unwrap();

        let err = load_context_source(&path, Some("day")).unwrap_err();
        assert!(matches!(err, Error::MissingContextSection { .. }));
    }

    #[test]
    fn test_expand_path_absolute_unchanged() {
        assert_eq!(
            expand_path("/etc/passwd", Path::new("/base")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn test_expand_path_relative_joins_base() {
        assert_eq!(
            expand_path("templates/a.conf", Path::new("/base")),
            PathBuf::from("/base/templates/a.conf")
        );
    }

    #[test]
    fn test_expand_path_tilde() {
        if std::env::var_os("HOME").is_none() {
            return;
        }
        let expanded = expand_path("~/notes.txt", Path::new("/base"));
        assert!(expanded.is_absolute());
        assert!(!expanded.starts_with("/base"));
        assert!(expanded.ends_with("notes.txt"));
    }
}
