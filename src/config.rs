//! Per-binary binsync configuration (`<binary_path>.toml` or a sibling
//! `binsync.toml`).
//!
//! Defines [`ProjectConfig`], the typed configuration consulted by the
//! `Controller`. Per §7's ConfigError policy, a missing or invalid file
//! never aborts the caller: [`ProjectConfig::load`] falls back to defaults
//! and logs a warning rather than propagating.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Per-binary binsync configuration.
///
/// Parsed from TOML. Missing fields use sensible defaults; a missing file
/// is not an error — it yields [`ProjectConfig::default`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProjectConfig {
    /// Seconds of "recent change" coloring window used by a decompiler UI
    /// to highlight artifacts another user just touched. Purely a UI hint
    /// — the Controller itself never reads this field.
    pub table_coloring_window: u64,

    /// Default merge behavior the Controller applies when no explicit
    /// level is passed to `push_artifact`/`fill_artifact`.
    pub merge_level: MergeLevel,

    /// Log verbosity hint for the CLI's `tracing-subscriber` init when no
    /// `RUST_LOG` override is present.
    pub log_level: LogLevel,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            table_coloring_window: default_table_coloring_window(),
            merge_level: MergeLevel::default(),
            log_level: LogLevel::default(),
        }
    }
}

const fn default_table_coloring_window() -> u64 {
    30 * 60
}

/// How the Controller resolves conflicting artifact changes on push/fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeLevel {
    /// Caller's value always wins, discarding the other side entirely.
    Overwrite,
    /// Field-by-field merge that only changes fields the other side left
    /// untouched; a real conflict is left unresolved (caller's value wins
    /// silently, matching the non-conflict-only guarantee).
    #[default]
    NonConflicting,
    /// Same as `NonConflicting` but recurses into nested artifacts
    /// (function header + stack variables) rather than replacing them
    /// wholesale.
    Merge,
}

impl fmt::Display for MergeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::NonConflicting => write!(f, "non-conflicting"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Log verbosity hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose, per-operation tracing.
    Debug,
    /// Connection/push/fill summaries only.
    #[default]
    Info,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Error loading a binsync configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if available.
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message, including line number when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ProjectConfig {
    /// Load configuration for a binary at `binary_path`.
    ///
    /// Tries `<binary_path>.toml` first, then a sibling `binsync.toml` in
    /// the same directory. If neither exists, returns defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if a candidate file exists but fails to parse.
    pub fn load_for_binary(binary_path: &Path) -> Result<Self, ConfigError> {
        let mut candidate = binary_path.as_os_str().to_owned();
        candidate.push(".toml");
        let per_binary = Path::new(&candidate);
        if per_binary.exists() {
            return Self::load(per_binary);
        }
        if let Some(dir) = binary_path.parent() {
            let sibling = dir.join("binsync.toml");
            if sibling.exists() {
                return Self::load(&sibling);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an exact TOML file path.
    ///
    /// - If the file does not exist, returns defaults (not an error).
    /// - If it exists but fails to parse, returns a `ConfigError`.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.table_coloring_window, 30 * 60);
        assert_eq!(cfg.merge_level, MergeLevel::NonConflicting);
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = ProjectConfig::parse("").unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
table_coloring_window = 120
merge_level = "overwrite"
log_level = "debug"
"#;
        let cfg = ProjectConfig::parse(toml).unwrap();
        assert_eq!(cfg.table_coloring_window, 120);
        assert_eq!(cfg.merge_level, MergeLevel::Overwrite);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let toml = "merge_level = \"merge\"";
        let cfg = ProjectConfig::parse(toml).unwrap();
        assert_eq!(cfg.merge_level, MergeLevel::Merge);
        assert_eq!(cfg.table_coloring_window, 30 * 60);
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = ProjectConfig::parse("bogus = true").unwrap_err();
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn parse_rejects_invalid_merge_level() {
        let err = ProjectConfig::parse("merge_level = \"whatever\"").unwrap_err();
        assert!(err.message.contains("unknown variant"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = ProjectConfig::load(Path::new("/nonexistent/binsync.toml")).unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }

    #[test]
    fn load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binsync.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").unwrap();
        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = ProjectConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_for_binary_prefers_per_binary_file() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("target.exe");
        std::fs::write(&binary, b"fake binary").unwrap();
        std::fs::write(dir.path().join("target.exe.toml"), "log_level = \"debug\"\n").unwrap();
        std::fs::write(dir.path().join("binsync.toml"), "log_level = \"info\"\n").unwrap();
        let cfg = ProjectConfig::load_for_binary(&binary).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn load_for_binary_falls_back_to_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("target.exe");
        std::fs::write(&binary, b"fake binary").unwrap();
        std::fs::write(
            dir.path().join("binsync.toml"),
            "merge_level = \"overwrite\"\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load_for_binary(&binary).unwrap();
        assert_eq!(cfg.merge_level, MergeLevel::Overwrite);
    }

    #[test]
    fn load_for_binary_defaults_when_neither_exists() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("target.exe");
        let cfg = ProjectConfig::load_for_binary(&binary).unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }
}
