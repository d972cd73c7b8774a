//! Workspace attachment file (`.forge.toml`).
//!
//! `forge init` writes it; every other verb reads it to find the server,
//! the attached state, and the author. Submitted change-set ids can be
//! stacked locally for `forge stack`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// The attachment file name.
pub const FILE_NAME: &str = ".forge.toml";

/// The parsed attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Base URL of the forge server.
    pub server: String,

    /// The state this directory is attached to.
    pub state: String,

    /// Author recorded on submissions.
    pub author: String,

    /// Change-set ids stacked with `submit --stack`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
}

impl CliConfig {
    /// A fresh attachment with defaults.
    #[must_use]
    pub fn new(server: &str, state: &str, author: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_owned(),
            state: state.to_owned(),
            author: author.to_owned(),
            stack: Vec::new(),
        }
    }

    /// Locate `.forge.toml` in `dir` or any ancestor.
    #[must_use]
    pub fn find(dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .map(|a| a.join(FILE_NAME))
            .find(|p| p.is_file())
    }

    /// Load the attachment for the current directory.
    ///
    /// # Errors
    /// Fails when no attachment exists or the file is malformed.
    pub fn load(dir: &Path) -> Result<(Self, PathBuf)> {
        let Some(path) = Self::find(dir) else {
            bail!(
                "no {FILE_NAME} found in '{}' or its parents.\n  To fix: run `forge init` or `forge attach --server <url>`.",
                dir.display()
            );
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let config =
            toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        Ok((config, path))
    }

    /// Write the attachment to `path`.
    ///
    /// # Errors
    /// I/O and encoding failures.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("encode attachment")?;
        std::fs::write(path, raw).with_context(|| format!("write {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        let mut config = CliConfig::new("http://127.0.0.1:7341/", "ws/alice", "alice");
        config.stack.push("cs_abc123".to_owned());
        config.save(&path).unwrap();

        let (loaded, found) = CliConfig::load(dir.path()).unwrap();
        assert_eq!(found, path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.server, "http://127.0.0.1:7341", "trailing slash trimmed");
    }

    #[test]
    fn find_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        CliConfig::new("http://localhost:7341", "main", "dev")
            .save(&dir.path().join(FILE_NAME))
            .unwrap();
        assert_eq!(
            CliConfig::find(&nested),
            Some(dir.path().join(FILE_NAME))
        );
    }

    #[test]
    fn load_without_attachment_is_actionable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("forge init"));
    }
}
