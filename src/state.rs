//! Persistent application state
//!
//! A small JSON document under the user configuration directory. Written on
//! every change the user would expect to survive a restart: favourite
//! directories and the buffer editor's submitted-line history.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const STATE_FILENAME: &str = "state.json";

/// On-disk state document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct State {
    /// Favourite directories (serialized as `favDirs`)
    pub fav_dirs: Vec<String>,
    /// Lines submitted through the buffer editor, oldest first
    pub history: Vec<String>,
}

impl State {
    fn path(config_dir: &Path) -> PathBuf {
        config_dir.join(STATE_FILENAME)
    }

    /// Load the state file, writing an empty one on first open
    pub fn load(config_dir: &Path) -> Result<State> {
        let path = Self::path(config_dir);
        if !path.exists() {
            let state = State::default();
            state.save(config_dir)?;
            return Ok(state);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read state file: {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state file: {}", path.display()))?;
        Ok(state)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let path = Self::path(config_dir);
        let content = serde_json::to_string(self).context("failed to serialize state")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write state file: {}", path.display()))?;
        Ok(())
    }

    /// Record a submitted line, dropping the oldest past `limit` entries.
    ///
    /// Consecutive duplicates collapse into one entry.
    pub fn push_history(&mut self, line: &str, limit: usize) {
        if line.is_empty() || self.history.last().map(String::as_str) == Some(line) {
            return;
        }
        self.history.push(line.to_string());
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}
