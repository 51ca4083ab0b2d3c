//! The module manager.
//!
//! Owns the process-wide context store and the ordered collection of
//! modules, and exposes the queries the run loop needs: how long until any
//! module's period changes, which modules have pending work, and where to
//! dispatch filesystem-modification events.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{expand_path, RawConfig};
use crate::context::{ContextStore, SharedContext};
use crate::error::Error;
use crate::module::{
    allocate_temp_target, Module, ModuleSection, ResolvedTemplate, TemplateRegistry,
};
use crate::timer::FOREVER;

/// Owns the context store and every enabled module, in declaration order.
#[derive(Debug)]
pub struct ModuleManager {
    directory: PathBuf,
    context: SharedContext,
    modules: Vec<Module>,
    default_timeout: Duration,
    exited: bool,
}

impl ModuleManager {
    /// Build the manager from a parsed configuration.
    ///
    /// Context sections are seeded into the store first, then one module is
    /// constructed per enabled `[module.*]` entry. Template declarations of
    /// every module are resolved before any module is built, so compile
    /// entries can reference templates across module boundaries. The only
    /// construction failure is a structurally invalid module entry; every
    /// other configuration problem is logged and skipped.
    pub fn new(config: RawConfig, directory: PathBuf) -> Result<Self, Error> {
        let mut store = ContextStore::new();
        for (name, value) in &config.context {
            match value.as_table() {
                Some(section) => store.insert(Some(name), section.clone()),
                None => {
                    let mut single = toml::Table::new();
                    single.insert(name.clone(), value.clone());
                    store.insert(None, single);
                }
            }
        }
        let context = store.into_shared();

        // First pass: validate sections and resolve template declarations,
        // allocating persisted temp targets where none is configured.
        let mut registry = TemplateRegistry::new();
        let mut prepared = Vec::new();
        for (name, value) in &config.modules {
            let mut section_table = toml::Table::new();
            section_table.insert(name.clone(), value.clone());
            let section = ModuleSection::from_table(&section_table)?;

            if !section.config.enabled {
                tracing::debug!("module \"{name}\" is disabled; skipping");
                continue;
            }

            let mut temp_files = Vec::new();
            let mut own_templates = BTreeMap::new();
            for (template_name, template) in &section.config.templates {
                let source = expand_path(&template.source, &directory);
                if !source.is_file() {
                    tracing::error!(
                        "module \"{name}\": template \"{template_name}\": source \"{}\" \
                         does not exist; skipping",
                        source.display()
                    );
                    continue;
                }
                let target = match &template.target {
                    Some(raw) => expand_path(raw, &directory),
                    None => match allocate_temp_target(
                        &format!("{name}-{template_name}-"),
                        &mut temp_files,
                    ) {
                        Ok(path) => path,
                        Err(err) => {
                            tracing::error!(
                                "module \"{name}\": could not allocate temp target for \
                                 template \"{template_name}\": {err}"
                            );
                            continue;
                        }
                    },
                };
                let resolved = ResolvedTemplate {
                    source,
                    target,
                    permissions: template.permissions.clone(),
                };
                own_templates.insert(template_name.clone(), resolved.clone());
                registry.insert(format!("{name}.{template_name}"), resolved);
            }
            prepared.push((section, own_templates, temp_files));
        }

        // Second pass: build the modules against the complete registry.
        let modules = prepared
            .into_iter()
            .map(|(section, own_templates, temp_files)| {
                Module::new(
                    section,
                    &directory,
                    own_templates,
                    &registry,
                    temp_files,
                    Arc::clone(&context),
                )
            })
            .collect();

        Ok(Self {
            directory,
            context,
            modules,
            default_timeout: config.general.run_timeout_duration(),
            exited: false,
        })
    }

    /// Load the configuration file at `path` and build the manager, using
    /// the file's directory as the anchor for relative paths.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let config = RawConfig::from_path(path)?;
        let canonical = path.canonicalize()?;
        let directory = canonical
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        Self::new(config, directory)
    }

    /// Run every module's startup block, in declaration order.
    pub fn startup(&mut self) {
        for module in &mut self.modules {
            module.startup(self.default_timeout);
        }
    }

    /// Finish pending work: startup for modules that have not started, then
    /// period changes for modules whose period label changed.
    ///
    /// Idempotent: calling again before any period changes does nothing.
    pub fn finish_tasks(&mut self) {
        for module in &mut self.modules {
            module.finish_tasks(self.default_timeout);
        }
    }

    /// True when any module has pending period work.
    #[must_use]
    pub fn has_unfinished_tasks(&self) -> bool {
        self.modules.iter().any(Module::has_unfinished_tasks)
    }

    /// The minimum time until any module's period changes; sizes the run
    /// loop's next wait.
    #[must_use]
    pub fn time_until_next_period(&self) -> Duration {
        self.modules
            .iter()
            .map(Module::time_until_next_period)
            .min()
            .unwrap_or(FOREVER)
    }

    /// Run every module's exit block, in declaration order, exactly once.
    pub fn exit(&mut self) {
        if self.exited {
            tracing::debug!("exit already performed");
            return;
        }
        self.exited = true;
        for module in &mut self.modules {
            module.exit(self.default_timeout);
        }
    }

    /// Dispatch a filesystem-modification event to every module.
    pub fn on_modified(&mut self, path: &Path) {
        for module in &mut self.modules {
            module.on_modified(path, self.default_timeout);
        }
    }

    /// The enabled modules, in declaration order.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Number of enabled modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True when no module is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Shared handle to the context store.
    #[must_use]
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// The directory anchoring every relative path in the configuration.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_from(config_text: &str, directory: &Path) -> ModuleManager {
        let config = RawConfig::parse(config_text).unwrap();
        ModuleManager::new(config, directory.to_path_buf()).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_disabled_modules_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_from(
            r#"
[module.first]
[module.second]
enabled = false
[module.third]
"#,
            dir.path(),
        );
        assert_eq!(manager.len(), 2);
        let names: Vec<_> = manager.modules().iter().map(Module::name).collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[test]
    fn test_structurally_invalid_module_entry_is_surfaced() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = RawConfig::parse("[module]\nbroken = \"not a table\"\n").unwrap();
        let err = ModuleManager::new(config, dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, Error::InvalidModuleConfig { .. }));
    }

    #[test]
    fn test_startup_runs_in_declaration_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = manager_from(
            r#"
[module.zulu.on_startup]
run = "echo zulu >> order.txt"

[module.alpha.on_startup]
run = "echo alpha >> order.txt"
"#,
            dir.path(),
        );
        manager.startup();
        assert_eq!(
            read_lines(&dir.path().join("order.txt")),
            vec!["zulu", "alpha"]
        );
    }

    #[test]
    fn test_finish_tasks_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = manager_from(
            r#"
[module.steady.on_period_change]
run = "echo change >> log.txt"
"#,
            dir.path(),
        );
        manager.finish_tasks();
        assert!(!manager.has_unfinished_tasks());
        manager.finish_tasks();
        manager.finish_tasks();
        assert_eq!(read_lines(&dir.path().join("log.txt")).len(), 1);
    }

    #[test]
    fn test_exit_runs_exactly_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = manager_from(
            r#"
[module.leaver.on_exit]
run = "echo bye >> log.txt"
"#,
            dir.path(),
        );
        manager.exit();
        manager.exit();
        assert_eq!(read_lines(&dir.path().join("log.txt")), vec!["bye"]);
    }

    #[test]
    fn test_time_until_next_period_takes_minimum() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_from(
            r#"
[module.forever]

[module.daily]
timer = { kind = "weekday" }
"#,
            dir.path(),
        );
        // The weekday module transitions within a day; the static one never.
        let wait = manager.time_until_next_period();
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn test_empty_manager_waits_forever() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_from("", dir.path());
        assert!(manager.is_empty());
        assert_eq!(manager.time_until_next_period(), FOREVER);
    }

    #[test]
    fn test_context_sections_are_seeded() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_from(
            r#"
[context.fonts]
mono = "Fira Code"
"#,
            dir.path(),
        );
        let store = crate::context::lock(manager.context());
        assert_eq!(
            store.lookup("fonts.mono").and_then(toml::Value::as_str),
            Some("Fira Code")
        );
    }

    #[test]
    fn test_declared_template_without_compile_stays_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.tpl"), "content").unwrap();
        let mut manager = manager_from(
            r#"
[module.lazy.templates.a]
source = "a.tpl"
"#,
            dir.path(),
        );
        manager.finish_tasks();

        // Declaration allocated a target, but nothing compiled into it.
        let target = &manager.modules()[0].templates()["a"].target;
        assert!(target.is_file());
        assert_eq!(std::fs::read_to_string(target).unwrap(), "");
    }

    #[test]
    fn test_cross_module_compile_reference() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.tpl"), "one\ntwo\nthree").unwrap();
        let mut manager = manager_from(
            r#"
[module.owner.templates.layout]
source = "a.tpl"

[module.builder.on_startup]
compile = ["owner.layout"]
"#,
            dir.path(),
        );
        manager.finish_tasks();

        let target = &manager.modules()[0].templates()["layout"].target;
        assert_eq!(std::fs::read_to_string(target).unwrap(), "one\ntwo\nthree");
    }

    #[test]
    fn test_missing_template_source_drops_declaration() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_from(
            r#"
[module.ghost.templates.phantom]
source = "does-not-exist.tpl"
"#,
            dir.path(),
        );
        assert!(manager.modules()[0].templates().is_empty());
    }

    #[test]
    fn test_on_modified_is_dispatched_to_every_module() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = manager_from(
            r#"
[module.one.on_modified."shared.txt"]
run = "echo one >> log.txt"

[module.two.on_modified."shared.txt"]
run = "echo two >> log.txt"
"#,
            dir.path(),
        );
        manager.on_modified(&dir.path().join("shared.txt"));
        assert_eq!(read_lines(&dir.path().join("log.txt")), vec!["one", "two"]);
    }

    #[test]
    fn test_imports_are_visible_across_modules() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("extra.toml"), "[palette]\nmain = \"teal\"").unwrap();
        std::fs::write(dir.path().join("b.tpl"), "color: {{palette.main}}").unwrap();
        let mut manager = manager_from(
            r#"
[module.importer.on_startup]
import_context = { from_path = "extra.toml" }

[module.renderer.on_startup]
compile = { source = "b.tpl", target = "b.out" }
"#,
            dir.path(),
        );
        manager.finish_tasks();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.out")).unwrap(),
            "color: teal"
        );
    }
}
