//! Process configuration from the environment.
//!
//! Every knob the engine and server recognize, with defaults that make a
//! bare `forge-server` useful:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `FORGE_STORE` | `memory` or `file` | `file` |
//! | `FORGE_STORE_PATH` | snapshot path for the file store | `forge.json` |
//! | `FORGE_PYTHON_PARSER_BIN` | external AST parser binary | unset |
//! | `FORGE_PARSER_MODE` | `auto`, `libcst`, or `ast` | `auto` |
//! | `FORGE_PARSER_STRICT` | disable the regex fallback | `false` |
//! | `FORGE_LOG` | `debug`/`info`/`warn`/`error`/`silent` | `info` |
//! | `FORGE_LOG_STATE_UPDATES` | log a line per `state_update` | `true` |
//! | `FORGE_PORT` | TCP port for the HTTP server | `7341` |
//!
//! Unrecognized values fall back to the default rather than aborting; the
//! chosen configuration is logged at startup so surprises are visible.

use std::fmt;
use std::path::PathBuf;

use crate::parser::ParserMode;

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Logging verbosity, including fully silent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    /// Parse a level name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }

    /// The `tracing` filter directive for this level, `None` for silent.
    #[must_use]
    pub const fn as_filter(self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("debug"),
            Self::Info => Some("info"),
            Self::Warn => Some("warn"),
            Self::Error => Some("error"),
            Self::Silent => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Silent => "silent",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// StoreKind
// ---------------------------------------------------------------------------

/// Which snapshot backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// Ephemeral in-memory document.
    Memory,
    /// JSON file, written via temp file + rename.
    #[default]
    File,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The resolved process configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub store: StoreKind,
    pub store_path: PathBuf,
    pub parser_bin: Option<PathBuf>,
    pub parser_mode: ParserMode,
    pub parser_strict: bool,
    pub log_level: LogLevel,
    pub log_state_updates: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreKind::File,
            store_path: PathBuf::from("forge.json"),
            parser_bin: None,
            parser_mode: ParserMode::Auto,
            parser_strict: false,
            log_level: LogLevel::Info,
            log_state_updates: true,
            port: 7341,
        }
    }
}

impl Config {
    /// Read configuration from `FORGE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable lookup (tests).
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let store = match lookup("FORGE_STORE").as_deref() {
            Some("memory") => StoreKind::Memory,
            Some("file") => StoreKind::File,
            _ => defaults.store,
        };
        Self {
            store,
            store_path: lookup("FORGE_STORE_PATH")
                .map_or(defaults.store_path, PathBuf::from),
            parser_bin: lookup("FORGE_PYTHON_PARSER_BIN").map(PathBuf::from),
            parser_mode: lookup("FORGE_PARSER_MODE")
                .as_deref()
                .and_then(ParserMode::parse)
                .unwrap_or(defaults.parser_mode),
            parser_strict: lookup("FORGE_PARSER_STRICT")
                .as_deref()
                .map_or(defaults.parser_strict, truthy),
            log_level: lookup("FORGE_LOG")
                .as_deref()
                .and_then(LogLevel::parse)
                .unwrap_or(defaults.log_level),
            log_state_updates: lookup("FORGE_LOG_STATE_UPDATES")
                .as_deref()
                .map_or(defaults.log_state_updates, truthy),
            port: lookup("FORGE_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

fn truthy(s: &str) -> bool {
    matches!(s, "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
