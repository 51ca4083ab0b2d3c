//! Template rendering.
//!
//! The boundary to the templating collaborator: a template file plus a
//! context snapshot becomes rendered text at the target path. Supports
//! `{{section.key}}` lookups into the context store and `{{shell:command}}`
//! filters executed in the module directory. Unknown lookups stay literal,
//! so untouched text round-trips unchanged.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::context::{ContextStore, SharedContext};
use crate::error::Error;
use crate::shell::{run_shell, ShellOutcome};

/// How long an embedded shell filter may run.
const SHELL_FILTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Compile `source` to `target` against the current context store.
///
/// Parent directories of the target are created as needed; `permissions`
/// is an octal mode string applied to the target after writing.
pub fn compile_template(
    source: &Path,
    target: &Path,
    context: &SharedContext,
    working_directory: &Path,
    permissions: Option<&str>,
) -> Result<(), Error> {
    if !source.is_file() {
        return Err(Error::MissingTemplateSource(source.to_path_buf()));
    }
    let content = fs::read_to_string(source)?;

    // Render against a snapshot so shell filters never run under the lock.
    let snapshot = crate::context::lock(context).clone();
    let rendered = render(&content, &snapshot, working_directory);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    tracing::info!(
        "compiling template \"{}\" -> \"{}\"",
        source.display(),
        target.display()
    );
    fs::write(target, rendered)?;

    if let Some(mode) = permissions {
        apply_permissions(target, mode)?;
    }
    Ok(())
}

/// Expand `{{...}}` tokens in a template string.
#[must_use]
pub fn render(template: &str, context: &ContextStore, working_directory: &Path) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let token = &after[..close];
                match expand_token(token, context, working_directory) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("{{");
                        result.push_str(token);
                        result.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                // No closing braces; emit the remainder untouched.
                result.push_str(&rest[open..]);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}

fn expand_token(token: &str, context: &ContextStore, working_directory: &Path) -> Option<String> {
    if let Some(command) = token.strip_prefix("shell:") {
        let command = command.trim();
        return match run_shell(command, working_directory, SHELL_FILTER_TIMEOUT) {
            ShellOutcome::Completed { stdout, .. } => Some(stdout),
            _ => {
                tracing::warn!("shell filter \"{command}\" did not complete");
                None
            }
        };
    }

    let lookup = token.trim();
    if lookup.is_empty() || lookup.contains(char::is_whitespace) {
        return None;
    }
    context.lookup(lookup).and_then(value_to_string)
}

fn value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(text) => Some(text.clone()),
        toml::Value::Integer(number) => Some(number.to_string()),
        toml::Value::Float(number) => Some(number.to_string()),
        toml::Value::Boolean(flag) => Some(flag.to_string()),
        toml::Value::Datetime(stamp) => Some(stamp.to_string()),
        // Structured values have no sensible inline form.
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn apply_permissions(target: &Path, mode: &str) -> Result<(), Error> {
    let bits = u32::from_str_radix(mode, 8)
        .map_err(|_| Error::InvalidPermissions(mode.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(bits))?;
    }
    #[cfg(not(unix))]
    {
        let _ = bits;
    }
    Ok(())
}
