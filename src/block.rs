//! Action blocks.
//!
//! An [`ActionBlock`] is the set of actions scoped to one lifecycle event.
//! Execution order is fixed regardless of declaration order: all context
//! imports, then all compilations, then all shell commands — later stages
//! may depend on context imported by earlier ones. Triggers are exposed
//! separately and never run as part of `execute`, so the caller stays in
//! control of cascading.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::action::{
    ActionEnv, CompileAction, CompileOptions, ImportContextAction, RunAction, RunOptions, Trigger,
    TriggerAction, TriggerOptions,
};
use crate::config::ImportContextConfig;

/// Resolved per-kind option sequences for one block.
///
/// `None` entries construct null-object actions, keeping slot counts stable
/// even when an entry failed to resolve.
#[derive(Debug, Default)]
pub struct BlockSpec {
    /// Context-import options, in declaration order.
    pub imports: Vec<Option<ImportContextConfig>>,
    /// Compile options, in declaration order.
    pub compiles: Vec<Option<CompileOptions>>,
    /// Run options, in declaration order.
    pub runs: Vec<Option<RunOptions>>,
    /// Trigger options, in declaration order.
    pub triggers: Vec<Option<TriggerOptions>>,
}

/// The actions of one lifecycle event, in fixed priority order.
#[derive(Debug)]
pub struct ActionBlock {
    import_context_actions: Vec<ImportContextAction>,
    compile_actions: Vec<CompileAction>,
    run_actions: Vec<RunAction>,
    trigger_actions: Vec<TriggerAction>,
}

impl ActionBlock {
    /// Instantiate every action of the block.
    #[must_use]
    pub fn new(spec: BlockSpec, env: &ActionEnv) -> Self {
        Self {
            import_context_actions: spec
                .imports
                .into_iter()
                .map(|options| ImportContextAction::new(options, env.clone()))
                .collect(),
            compile_actions: spec
                .compiles
                .into_iter()
                .map(|options| CompileAction::new(options, env.clone()))
                .collect(),
            run_actions: spec
                .runs
                .into_iter()
                .map(|options| RunAction::new(options, env.clone()))
                .collect(),
            trigger_actions: spec
                .triggers
                .into_iter()
                .map(|options| TriggerAction::new(options, env.clone()))
                .collect(),
        }
    }

    /// Run every context import.
    pub fn import_context(&self) {
        for action in &self.import_context_actions {
            action.execute();
        }
    }

    /// Run every compilation.
    pub fn compile(&mut self) {
        for action in &mut self.compile_actions {
            action.execute();
        }
    }

    /// Run every shell command, collecting non-null `(command, stdout)`
    /// pairs in order.
    pub fn run(&self, default_timeout: Duration) -> Vec<(String, String)> {
        self.run_actions
            .iter()
            .filter_map(|action| action.execute(default_timeout))
            .collect()
    }

    /// The trigger instructions of this block, in order.
    #[must_use]
    pub fn triggers(&self) -> Vec<Trigger> {
        self.trigger_actions
            .iter()
            .filter_map(TriggerAction::execute)
            .collect()
    }

    /// Execute the block: imports, then compilations, then shell commands.
    ///
    /// Triggers are deliberately not honored here; interpret them via
    /// [`Self::triggers`].
    pub fn execute(&mut self, default_timeout: Duration) -> Vec<(String, String)> {
        self.import_context();
        self.compile();
        self.run(default_timeout)
    }

    /// Union of all compilations performed by this block so far.
    #[must_use]
    pub fn performed_compilations(&self) -> BTreeMap<PathBuf, BTreeSet<PathBuf>> {
        let mut all: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
        for action in &self.compile_actions {
            for (source, targets) in action.performed_compilations() {
                all.entry(source.clone()).or_default().extend(targets.iter().cloned());
            }
        }
        all
    }

    /// Mutable access to the compile actions, for targeted recompilation.
    pub(crate) fn compile_actions_mut(&mut self) -> impl Iterator<Item = &mut CompileAction> {
        self.compile_actions.iter_mut()
    }
}
