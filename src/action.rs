//! Module actions.
//!
//! Each action type wraps the user-specified options for one unit of work.
//! An action constructed without options is a null object: `execute()` does
//! nothing and returns an empty result, so callers can invoke every
//! configured slot unconditionally. All string options pass through the
//! module's placeholder [`Replacer`] before use, and path options resolve to
//! absolute paths anchored at the module directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{expand_path, load_context_source, ImportContextConfig};
use crate::context::{self, SharedContext};
use crate::shell::{run_shell, ShellOutcome};
use crate::template;
use crate::timer::Timer;

/// A lifecycle block a trigger can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Runs once when the engine starts.
    Startup,
    /// Runs when the module timer's period changes.
    PeriodChange,
    /// Runs once at shutdown.
    Exit,
    /// Runs when a watched path is modified.
    Modified,
}

impl BlockKind {
    /// Decode a configuration block name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "on_startup" => Some(Self::Startup),
            "on_period_change" => Some(Self::PeriodChange),
            "on_exit" => Some(Self::Exit),
            "on_modified" => Some(Self::Modified),
            _ => None,
        }
    }

    /// The configuration name of this block.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Startup => "on_startup",
            Self::PeriodChange => "on_period_change",
            Self::Exit => "on_exit",
            Self::Modified => "on_modified",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Placeholder substitution strategy threaded through every action.
///
/// Replaces `{period}` with the module timer's current period label and
/// `{name}` / `{module.name}` with the compile target of a declared
/// template. Unknown placeholders are left untouched.
#[derive(Debug, Clone)]
pub struct Replacer {
    timer: Arc<Timer>,
    targets: Arc<BTreeMap<String, PathBuf>>,
}

impl Replacer {
    /// Build a replacer over a timer and a template-target map.
    #[must_use]
    pub fn new(timer: Arc<Timer>, targets: Arc<BTreeMap<String, PathBuf>>) -> Self {
        Self { timer, targets }
    }

    /// Substitute every known `{placeholder}` in `input`.
    #[must_use]
    pub fn apply(&self, input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let token = &after[..close];
                    match self.substitute(token) {
                        Some(value) => result.push_str(&value),
                        None => {
                            result.push('{');
                            result.push_str(token);
                            result.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    result.push_str(&rest[open..]);
                    return result;
                }
            }
        }
        result.push_str(rest);
        result
    }

    fn substitute(&self, token: &str) -> Option<String> {
        if token == "period" {
            return Some(self.timer.period());
        }
        self.targets
            .get(token)
            .map(|target| target.display().to_string())
    }
}

/// Everything an action needs besides its own options.
#[derive(Debug, Clone)]
pub struct ActionEnv {
    /// Anchor for relative paths; the module directory.
    pub directory: PathBuf,
    /// The module's placeholder substitution strategy.
    pub replacer: Replacer,
    /// Shared handle to the process-wide context store.
    pub context: SharedContext,
}

impl ActionEnv {
    /// Substitute placeholders, then resolve to an absolute path.
    fn resolve_path(&self, raw: &str) -> PathBuf {
        expand_path(&self.replacer.apply(raw), &self.directory)
    }
}

/// Imports external key/value data into the shared context store.
#[derive(Debug)]
pub struct ImportContextAction {
    options: Option<ImportContextConfig>,
    env: ActionEnv,
}

impl ImportContextAction {
    /// Execution priority; lower runs first.
    pub const PRIORITY: u32 = 100;

    /// Build the action; `None` options yield a null object.
    #[must_use]
    pub fn new(options: Option<ImportContextConfig>, env: ActionEnv) -> Self {
        Self { options, env }
    }

    /// Import the configured section into the store.
    ///
    /// A missing source or section is logged and skipped, never fatal.
    pub fn execute(&self) {
        let Some(options) = &self.options else {
            return;
        };
        let from_path = self.env.resolve_path(&options.from_path);
        let from_section = options
            .from_section
            .as_deref()
            .map(|section| self.env.replacer.apply(section));
        let to_section = options
            .to_section
            .as_deref()
            .map(|section| self.env.replacer.apply(section));

        match load_context_source(&from_path, from_section.as_deref()) {
            Ok(data) => context::lock(&self.env.context).insert(to_section.as_deref(), data),
            Err(err) => tracing::error!("skipping context import: {err}"),
        }
    }
}

/// Resolved options of a compile action.
///
/// The target is always present: explicit configuration, a declared
/// template's target, or a persisted temp file allocated at module
/// construction and recorded here so repeated executions reuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Template file or directory.
    pub source: String,
    /// Compile destination.
    pub target: String,
    /// Octal permission bits for the target.
    pub permissions: Option<String>,
}

/// Compiles templates against the current context store.
#[derive(Debug)]
pub struct CompileAction {
    options: Option<CompileOptions>,
    env: ActionEnv,
    performed: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl CompileAction {
    /// Execution priority; lower runs first.
    pub const PRIORITY: u32 = 200;

    /// Build the action; `None` options yield a null object.
    #[must_use]
    pub fn new(options: Option<CompileOptions>, env: ActionEnv) -> Self {
        Self {
            options,
            env,
            performed: BTreeMap::new(),
        }
    }

    /// Compile the configured source, returning `source → target` for every
    /// file compiled.
    ///
    /// A directory source compiles every file beneath it to the mirrored
    /// relative path under the target. A missing source logs one error and
    /// produces an empty map.
    pub fn execute(&mut self) -> BTreeMap<PathBuf, PathBuf> {
        let Some(options) = self.options.clone() else {
            return BTreeMap::new();
        };
        let source = self.env.resolve_path(&options.source);
        let target = self.env.resolve_path(&options.target);

        let mut compilations = BTreeMap::new();
        if source.is_file() {
            self.compile_one(&source, &target, options.permissions.as_deref());
            compilations.insert(source, target);
        } else if source.is_dir() {
            for file in files_beneath(&source) {
                let relative = file.strip_prefix(&source).unwrap_or(&file).to_path_buf();
                let file_target = target.join(relative);
                self.compile_one(&file, &file_target, options.permissions.as_deref());
                compilations.insert(file, file_target);
            }
        } else {
            tracing::error!(
                "could not compile template \"{}\" to target \"{}\": no such path",
                source.display(),
                target.display()
            );
        }

        for (compiled_source, compiled_target) in &compilations {
            self.performed
                .entry(compiled_source.clone())
                .or_default()
                .insert(compiled_target.clone());
        }
        compilations
    }

    fn compile_one(&self, source: &Path, target: &Path, permissions: Option<&str>) {
        if let Err(err) = template::compile_template(
            source,
            target,
            &self.env.context,
            &self.env.directory,
            permissions,
        ) {
            tracing::error!("failed to compile \"{}\": {err}", source.display());
        }
    }

    /// All compilations performed so far: template → set of targets.
    #[must_use]
    pub fn performed_compilations(&self) -> &BTreeMap<PathBuf, BTreeSet<PathBuf>> {
        &self.performed
    }

    /// True when `path` is a template this action manages and has compiled.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.performed.contains_key(path)
    }

    /// Recompile one managed template to its recorded targets.
    pub fn recompile(&mut self, path: &Path) {
        let Some(options) = self.options.clone() else {
            return;
        };
        let Some(targets) = self.performed.get(path).cloned() else {
            return;
        };
        for target in targets {
            self.compile_one(path, &target, options.permissions.as_deref());
        }
    }
}

/// Resolved options of a run action.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// The shell command.
    pub shell: String,
    /// Wait bound; `Some(0)` is fire-and-forget, `None` uses the caller's
    /// default.
    pub timeout: Option<Duration>,
}

/// Runs a shell command in the module directory.
#[derive(Debug)]
pub struct RunAction {
    options: Option<RunOptions>,
    env: ActionEnv,
}

impl RunAction {
    /// Execution priority; lower runs first.
    pub const PRIORITY: u32 = 300;

    /// Build the action; `None` options yield a null object.
    #[must_use]
    pub fn new(options: Option<RunOptions>, env: ActionEnv) -> Self {
        Self { options, env }
    }

    /// Run the command, returning `(command, stdout)`; `None` for the null
    /// object.
    ///
    /// A timeout is logged as a warning and a non-zero exit code as an
    /// error; neither aborts the containing block.
    pub fn execute(&self, default_timeout: Duration) -> Option<(String, String)> {
        let options = self.options.as_ref()?;
        let command = self.env.replacer.apply(&options.shell);
        let timeout = options.timeout.unwrap_or(default_timeout);
        tracing::info!("running command \"{command}\"");

        let stdout = match run_shell(&command, &self.env.directory, timeout) {
            ShellOutcome::Completed {
                code,
                stdout,
                stderr,
            } => {
                if !stdout.is_empty() {
                    tracing::info!("{stdout}");
                }
                if !stderr.is_empty() {
                    tracing::error!("{stderr}");
                }
                if code != 0 {
                    tracing::error!(
                        "command \"{command}\" exited with non-zero return code {code}"
                    );
                }
                stdout
            }
            ShellOutcome::TimedOut => {
                tracing::warn!(
                    "command \"{command}\" did not finish within {:.1}s; \
                     leaving it running, the exit code can not be verified",
                    timeout.as_secs_f64()
                );
                String::new()
            }
            ShellOutcome::Detached => String::new(),
            ShellOutcome::Failed(err) => {
                tracing::error!("failed to run command \"{command}\": {err}");
                String::new()
            }
        };
        Some((command, stdout))
    }
}

/// Resolved options of a trigger action.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOptions {
    /// The lifecycle block to trigger.
    pub block: BlockKind,
    /// Watched path, required for `on_modified` triggers.
    pub path: Option<String>,
}

/// An instruction to additionally invoke another lifecycle block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// The block to invoke.
    pub block: BlockKind,
    /// The path option as the user wrote it, for `on_modified` triggers.
    pub specified_path: Option<String>,
    /// The specified path as a relative path.
    pub relative_path: Option<PathBuf>,
    /// The specified path resolved against the module directory.
    pub absolute_path: Option<PathBuf>,
}

/// Emits a [`Trigger`] for the owning module to interpret.
///
/// Executing the action has no side effect of its own; whether and when the
/// named block actually runs is the caller's decision.
#[derive(Debug)]
pub struct TriggerAction {
    options: Option<TriggerOptions>,
    env: ActionEnv,
}

impl TriggerAction {
    /// Execution priority; lower runs first.
    pub const PRIORITY: u32 = 0;

    /// Build the action; `None` options yield a null object.
    #[must_use]
    pub fn new(options: Option<TriggerOptions>, env: ActionEnv) -> Self {
        Self { options, env }
    }

    /// Produce the trigger instruction; `None` for the null object.
    pub fn execute(&self) -> Option<Trigger> {
        let options = self.options.as_ref()?;
        if options.block != BlockKind::Modified {
            return Some(Trigger {
                block: options.block,
                specified_path: None,
                relative_path: None,
                absolute_path: None,
            });
        }

        let Some(path) = &options.path else {
            tracing::error!("on_modified trigger is missing its path option");
            return None;
        };
        let specified = self.env.replacer.apply(path);
        Some(Trigger {
            block: BlockKind::Modified,
            relative_path: Some(PathBuf::from(&specified)),
            absolute_path: Some(expand_path(&specified, &self.env.directory)),
            specified_path: Some(specified),
        })
    }
}

/// Every file beneath `root`, recursively, in sorted order.
fn files_beneath(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
