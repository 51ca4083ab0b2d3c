//! Error taxonomy for the automation engine.
//!
//! Almost every runtime failure is recovered locally: the offending action
//! logs and becomes a no-op so one misconfigured module never prevents the
//! others from running. The variants below therefore mostly surface during
//! configuration loading; shell timeouts and non-zero exit codes are log
//! events, not error values.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by configuration loading and action resolution.
#[derive(Debug, Error)]
pub enum Error {
    /// A context import referenced a file that does not exist.
    #[error("context source does not exist: {0}")]
    MissingContextSource(PathBuf),

    /// A context import referenced a section missing from its source file.
    #[error("context source '{path}' has no section '{section}'")]
    MissingContextSection {
        /// The context source file.
        path: PathBuf,
        /// The requested section within it.
        section: String,
    },

    /// A module section did not contain exactly one `name → table` entry.
    #[error("module section must contain exactly one module entry, found {0}")]
    InvalidModuleSection(usize),

    /// A module entry could not be decoded into a module configuration.
    #[error("invalid configuration for module '{module}': {reason}")]
    InvalidModuleConfig {
        /// The offending module name.
        module: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A compile entry referenced a template name no module declares.
    #[error("unknown template reference '{0}'")]
    UnknownTemplate(String),

    /// A compile source path does not exist on disk.
    #[error("template source does not exist: {0}")]
    MissingTemplateSource(PathBuf),

    /// A `permissions` option was not a valid octal mode string.
    #[error("invalid permissions string '{0}': expected an octal mode such as \"644\"")]
    InvalidPermissions(String),

    /// An underlying filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A TOML document could not be parsed.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_section_message_names_path_and_section() {
        let err = Error::MissingContextSection {
            path: PathBuf::from("/etc/colors.toml"),
            section: "night".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/colors.toml"), "missing path: {msg}");
        assert!(msg.contains("night"), "missing section: {msg}");
    }

    #[test]
    fn test_io_error_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(io);
        assert_eq!(err.to_string(), "gone");
    }
}
