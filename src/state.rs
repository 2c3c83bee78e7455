//! Saved rule set
//!
//! The configured rules are kept as JSON between invocations. The kernel
//! table and the boot mirror are derived from this list, never the other
//! way around.

use crate::routing::RouteRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse state file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Unsupported state file version {0}")]
    UnsupportedVersion(u32),
}

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteState {
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

impl Default for RouteState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RouteState {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            version: STATE_VERSION,
            rules,
        }
    }

    /// `Ok(None)` when nothing was saved yet
    pub fn load(path: &Path) -> Result<Option<Self>, StateError> {
        if !path.exists() {
            debug!("No state file at {}", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let state: RouteState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved {} rules to {}", self.rules.len(), path.display());
        Ok(())
    }
}
