//! Hierarchical context store.
//!
//! A mapping from section name to arbitrarily nested key/value data, fed by
//! static configuration and `import_context` actions, and consumed by
//! template compilation and placeholder substitution. Imports merge
//! key-by-key into existing sections; on collision the newer value wins.

use std::sync::{Arc, Mutex, MutexGuard};

use toml::{Table, Value};

/// Shared handle to the process-wide context store.
///
/// The store is owned by the module manager and lent to every action, so an
/// import performed by one module is visible to templates compiled by any
/// module afterwards. The mutex serializes access between the main loop and
/// the filesystem-watcher thread.
pub type SharedContext = Arc<Mutex<ContextStore>>;

/// Lock a shared store, recovering the guard if a holder panicked.
pub(crate) fn lock(context: &SharedContext) -> MutexGuard<'_, ContextStore> {
    context.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Hierarchical key/value data available to templates and placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStore {
    sections: Table,
}

impl ContextStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the store in a shared, lockable handle.
    #[must_use]
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Merge `data` into `section`, or into the root when `section` is `None`.
    ///
    /// Nested tables merge recursively; anything else is overwritten by the
    /// incoming value. Empty input is a no-op, so a section is never created
    /// just by importing nothing into it.
    pub fn insert(&mut self, section: Option<&str>, data: Table) {
        if data.is_empty() {
            return;
        }
        match section {
            None => merge_tables(&mut self.sections, data),
            Some(name) => {
                let mut table = match self.sections.remove(name) {
                    Some(Value::Table(existing)) => existing,
                    // A scalar under this name is replaced wholesale.
                    _ => Table::new(),
                };
                merge_tables(&mut table, data);
                self.sections.insert(name.to_string(), Value::Table(table));
            }
        }
    }

    /// Look up a dotted path such as `colors.primary` or `fonts.mono.size`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.sections.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Return a named top-level section, if present as a table.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Table> {
        self.sections.get(name).and_then(Value::as_table)
    }

    /// Number of top-level entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// True when nothing has been inserted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Recursively merge `src` into `dest`; `src` wins on scalar collisions.
fn merge_tables(dest: &mut Table, src: Table) {
    for (key, value) in src {
        match (dest.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, incoming) => {
                dest.insert(key, incoming);
            }
        }
    }
}
