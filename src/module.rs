//! User-configured modules.
//!
//! A module couples one timer to four lifecycle action blocks plus a set of
//! named template declarations. The manager drives it through well-defined
//! entry points: `startup` runs at most once, `period_change` only when the
//! timer's period label actually changed, `exit` releases every temp
//! compile target the module allocated, and `on_modified` reacts to
//! filesystem events.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::action::{ActionEnv, BlockKind, CompileOptions, Replacer, RunOptions, TriggerOptions};
use crate::block::{ActionBlock, BlockSpec};
use crate::config::{
    expand_path, BlockConfig, CompileEntry, ModuleConfig, RunEntry, TriggerEntry,
};
use crate::context::SharedContext;
use crate::error::Error;
use crate::timer::Timer;

/// A template declaration with its paths fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    /// Absolute template source path.
    pub source: PathBuf,
    /// Absolute compile target; a persisted temp file when not configured.
    pub target: PathBuf,
    /// Octal permission bits for the target.
    pub permissions: Option<String>,
}

/// Every declared template across all enabled modules, keyed by
/// `module.template`.
pub type TemplateRegistry = BTreeMap<String, ResolvedTemplate>;

/// One validated `name → config` pair extracted from a module section.
#[derive(Debug, Clone)]
pub struct ModuleSection {
    /// The module name.
    pub name: String,
    /// The decoded module configuration.
    pub config: ModuleConfig,
}

impl ModuleSection {
    /// Extract the single module entry from a section table.
    ///
    /// A section holding more than one module entry is a structural
    /// configuration error and is surfaced rather than defaulted.
    pub fn from_table(section: &toml::Table) -> Result<Self, Error> {
        if section.len() != 1 {
            return Err(Error::InvalidModuleSection(section.len()));
        }
        let Some((name, value)) = section.iter().next() else {
            return Err(Error::InvalidModuleSection(0));
        };
        let config: ModuleConfig =
            value
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| Error::InvalidModuleConfig {
                    module: name.clone(),
                    reason: err.to_string(),
                })?;
        Ok(Self {
            name: name.clone(),
            config,
        })
    }
}

/// An `on_modified` block bound to one watched path.
#[derive(Debug)]
struct WatchedBlock {
    absolute: PathBuf,
    block: ActionBlock,
}

/// One user-configured module.
#[derive(Debug)]
pub struct Module {
    name: String,
    timer: Arc<Timer>,
    templates: BTreeMap<String, ResolvedTemplate>,
    on_startup: ActionBlock,
    on_period_change: ActionBlock,
    on_exit: ActionBlock,
    on_modified: Vec<WatchedBlock>,
    temp_files: Vec<NamedTempFile>,
    started: bool,
    last_seen_period: Option<String>,
}

impl Module {
    /// Build a module from its validated section.
    ///
    /// `own_templates` are this module's declarations by bare name;
    /// `registry` carries every module's declarations by qualified name, so
    /// compile entries can reach across modules. `temp_files` holds the
    /// temp targets already allocated for targetless declarations; targets
    /// allocated for inline compile entries are appended to it.
    pub(crate) fn new(
        section: ModuleSection,
        directory: &Path,
        own_templates: BTreeMap<String, ResolvedTemplate>,
        registry: &TemplateRegistry,
        mut temp_files: Vec<NamedTempFile>,
        context: SharedContext,
    ) -> Self {
        let ModuleSection { name, config } = section;
        let timer = Arc::new(Timer::from_config(&config.timer));

        let mut targets: BTreeMap<String, PathBuf> = registry
            .iter()
            .map(|(qualified, template)| (qualified.clone(), template.target.clone()))
            .collect();
        for (template_name, template) in &own_templates {
            targets.insert(template_name.clone(), template.target.clone());
        }

        let env = ActionEnv {
            directory: directory.to_path_buf(),
            replacer: Replacer::new(Arc::clone(&timer), Arc::new(targets)),
            context,
        };

        let mut build = |block_config: &BlockConfig| {
            let spec = resolve_block(
                block_config,
                &name,
                &own_templates,
                registry,
                &mut temp_files,
            );
            ActionBlock::new(spec, &env)
        };

        let on_startup = build(&config.on_startup);
        let on_period_change = build(&config.on_period_change);
        let on_exit = build(&config.on_exit);
        let on_modified = config
            .on_modified
            .iter()
            .map(|(raw_path, block_config)| WatchedBlock {
                absolute: expand_path(raw_path, directory),
                block: build(block_config),
            })
            .collect();

        Self {
            name,
            timer,
            templates: own_templates,
            on_startup,
            on_period_change,
            on_exit,
            on_modified,
            temp_files,
            started: false,
            last_seen_period: None,
        }
    }

    /// The module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module's timer.
    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// This module's template declarations by bare name.
    #[must_use]
    pub fn templates(&self) -> &BTreeMap<String, ResolvedTemplate> {
        &self.templates
    }

    /// Duration until this module's timer transitions.
    #[must_use]
    pub fn time_until_next_period(&self) -> Duration {
        self.timer.time_until_next_period()
    }

    /// True when the timer's period differs from the one observed at the
    /// previous `finish_tasks`.
    #[must_use]
    pub fn has_unfinished_tasks(&self) -> bool {
        self.last_seen_period.as_deref() != Some(self.timer.period().as_str())
    }

    /// Run the startup block. Does nothing on repeat calls.
    pub fn startup(&mut self, default_timeout: Duration) {
        if self.started {
            return;
        }
        self.started = true;
        let _span = tracing::info_span!("module", name = %self.name).entered();
        tracing::info!("running startup block");
        self.run_block(BlockKind::Startup, None, default_timeout);
    }

    /// Run the period-change block.
    ///
    /// Callers are expected to gate this on [`Self::has_unfinished_tasks`];
    /// it does not check the timer itself.
    pub fn period_change(&mut self, default_timeout: Duration) {
        let _span = tracing::info_span!("module", name = %self.name).entered();
        tracing::info!(period = %self.timer.period(), "running period change block");
        self.run_block(BlockKind::PeriodChange, None, default_timeout);
    }

    /// Run startup if it has not run, then the period-change block if the
    /// period label changed, recording the label acted on.
    pub fn finish_tasks(&mut self, default_timeout: Duration) {
        if !self.started {
            self.startup(default_timeout);
        }
        if self.has_unfinished_tasks() {
            let current = self.timer.period();
            self.period_change(default_timeout);
            self.last_seen_period = Some(current);
        }
    }

    /// Run the exit block and release every temp compile target.
    ///
    /// Safe to call even if `startup` never ran; temp files are deleted
    /// regardless of what earlier lifecycle calls did.
    pub fn exit(&mut self, default_timeout: Duration) {
        let _span = tracing::info_span!("module", name = %self.name).entered();
        tracing::info!("running exit block");
        self.run_block(BlockKind::Exit, None, default_timeout);
        self.temp_files.clear();
    }

    /// React to a modified path: recompile every managed template matching
    /// it, then run the matching `on_modified` block, if any.
    pub fn on_modified(&mut self, path: &Path, default_timeout: Duration) {
        let _span = tracing::info_span!("module", name = %self.name).entered();

        let mut recompiled = false;
        for block in self.blocks_mut() {
            for action in block.compile_actions_mut() {
                if action.contains(path) {
                    action.recompile(path);
                    recompiled = true;
                }
            }
        }
        if recompiled {
            tracing::info!("recompiled modified template \"{}\"", path.display());
        }

        if self.watches(path) {
            self.run_block(BlockKind::Modified, Some(path), default_timeout);
        }
    }

    /// Execute a block and honor its triggers, each target block at most
    /// once per entry point so trigger cycles terminate.
    fn run_block(&mut self, kind: BlockKind, path: Option<&Path>, default_timeout: Duration) {
        let mut queue = VecDeque::new();
        queue.push_back((kind, path.map(Path::to_path_buf)));
        let mut visited: HashSet<(BlockKind, Option<PathBuf>)> = HashSet::new();

        while let Some((kind, path)) = queue.pop_front() {
            if !visited.insert((kind, path.clone())) {
                continue;
            }
            let Some(block) = self.block_mut(kind, path.as_deref()) else {
                tracing::debug!("no {kind} block configured for this trigger");
                continue;
            };
            block.execute(default_timeout);
            for trigger in block.triggers() {
                tracing::debug!("honoring trigger to {} block", trigger.block);
                queue.push_back((trigger.block, trigger.absolute_path));
            }
        }
    }

    fn block_mut(&mut self, kind: BlockKind, path: Option<&Path>) -> Option<&mut ActionBlock> {
        match kind {
            BlockKind::Startup => Some(&mut self.on_startup),
            BlockKind::PeriodChange => Some(&mut self.on_period_change),
            BlockKind::Exit => Some(&mut self.on_exit),
            BlockKind::Modified => {
                let path = path?;
                self.on_modified
                    .iter_mut()
                    .find(|watched| watched.absolute == path)
                    .map(|watched| &mut watched.block)
            }
        }
    }

    fn blocks_mut(&mut self) -> impl Iterator<Item = &mut ActionBlock> {
        std::iter::once(&mut self.on_startup)
            .chain(std::iter::once(&mut self.on_period_change))
            .chain(std::iter::once(&mut self.on_exit))
            .chain(self.on_modified.iter_mut().map(|watched| &mut watched.block))
    }

    fn watches(&self, path: &Path) -> bool {
        self.on_modified
            .iter()
            .any(|watched| watched.absolute == path)
    }
}

/// Allocate a persisted temp file to serve as a compile target.
pub(crate) fn allocate_temp_target(
    prefix: &str,
    temp_files: &mut Vec<NamedTempFile>,
) -> std::io::Result<PathBuf> {
    let file = tempfile::Builder::new().prefix(prefix).tempfile()?;
    let path = file.path().to_path_buf();
    // The handle must outlive the action: dropping it deletes the file.
    temp_files.push(file);
    Ok(path)
}

/// Resolve a block's raw configuration into per-kind option sequences.
///
/// Entries that cannot be resolved — unknown template references, trigger
/// entries without a known block — are logged and become null objects.
fn resolve_block(
    config: &BlockConfig,
    module_name: &str,
    own_templates: &BTreeMap<String, ResolvedTemplate>,
    registry: &TemplateRegistry,
    temp_files: &mut Vec<NamedTempFile>,
) -> BlockSpec {
    let imports = config
        .import_context_entries()
        .into_iter()
        .map(Some)
        .collect();

    let compiles = config
        .compile_entries()
        .into_iter()
        .map(|entry| {
            resolve_compile_entry(entry, module_name, own_templates, registry, temp_files)
        })
        .collect();

    let runs = config
        .run_entries()
        .into_iter()
        .map(|entry| match entry {
            RunEntry::Command(shell) => Some(RunOptions {
                shell,
                timeout: None,
            }),
            RunEntry::Detailed(detailed) => detailed.shell.map(|shell| RunOptions {
                shell,
                timeout: detailed
                    .timeout
                    .map(|seconds| Duration::from_secs_f64(seconds.max(0.0))),
            }),
        })
        .collect();

    let triggers = config
        .trigger_entries()
        .into_iter()
        .map(|entry| resolve_trigger_entry(entry, module_name))
        .collect();

    BlockSpec {
        imports,
        compiles,
        runs,
        triggers,
    }
}

fn resolve_compile_entry(
    entry: CompileEntry,
    module_name: &str,
    own_templates: &BTreeMap<String, ResolvedTemplate>,
    registry: &TemplateRegistry,
    temp_files: &mut Vec<NamedTempFile>,
) -> Option<CompileOptions> {
    match entry {
        CompileEntry::Reference(reference) => {
            let resolved = if reference.contains('.') {
                registry.get(&reference)
            } else {
                own_templates.get(&reference)
            };
            match resolved {
                Some(template) => Some(CompileOptions {
                    source: template.source.display().to_string(),
                    target: template.target.display().to_string(),
                    permissions: template.permissions.clone(),
                }),
                None => {
                    tracing::error!(
                        "module \"{module_name}\": {}",
                        Error::UnknownTemplate(reference)
                    );
                    None
                }
            }
        }
        CompileEntry::Inline(inline) => {
            let target = match inline.target {
                Some(target) => target,
                None => {
                    match allocate_temp_target(&format!("{module_name}-compile-"), temp_files) {
                        Ok(path) => path.display().to_string(),
                        Err(err) => {
                            tracing::error!(
                                "module \"{module_name}\": could not allocate temp target: {err}"
                            );
                            return None;
                        }
                    }
                }
            };
            Some(CompileOptions {
                source: inline.source,
                target,
                permissions: inline.permissions,
            })
        }
    }
}

fn resolve_trigger_entry(entry: TriggerEntry, module_name: &str) -> Option<TriggerOptions> {
    let (block_name, path) = match entry {
        TriggerEntry::Block(name) => (Some(name), None),
        TriggerEntry::Detailed(detailed) => {
            if detailed.block.is_none() && detailed.path.is_none() {
                // An empty entry is a null object, not a configuration error.
                return None;
            }
            (detailed.block, detailed.path)
        }
    };
    let Some(block_name) = block_name else {
        tracing::error!("module \"{module_name}\": trigger entry is missing its block option");
        return None;
    };
    match BlockKind::parse(&block_name) {
        Some(block) => Some(TriggerOptions { block, path }),
        None => {
            tracing::error!("module \"{module_name}\": unknown trigger block \"{block_name}\"");
            None
        }
    }
}
