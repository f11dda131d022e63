//! Entity store
//!
//! Directory layout, relative to the memory root:
//!
//! - `entities/<name>.md`: one file per entity, body is free text
//! - `entities/successful_patterns.md`: append-only learning log
//! - `entities/planning_errors.md`: append-only learning log
//! - `entities/execution_log.md`: append-only state-transition log
//!
//! The set of addressable entities IS the directory listing: a name is valid
//! iff a file exists. The reserved log files are never listed as entities.

use anyhow::{Context, Result};
use sdk::errors::CoreError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Entity directory under the memory root
pub const ENTITIES_DIR: &str = "entities";

/// Reserved file names that are logs, not entities
pub const RESERVED_FILES: &[&str] = &[
    "successful_patterns",
    "planning_errors",
    "execution_log",
];

/// Transient-read retry schedule in milliseconds
const READ_BACKOFF_MS: &[u64] = &[100, 400, 1600];

/// Read-only view over the entity directory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    /// Open the store, verifying the entity directory exists.
    ///
    /// A missing directory is fatal: the memory root is part of the
    /// configuration contract.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        let entities = root.join(ENTITIES_DIR);
        if !entities.is_dir() {
            return Err(CoreError::ConfigMissing(format!(
                "entity directory missing: {}",
                entities.display()
            )));
        }
        Ok(Self { root })
    }

    /// The memory root this store was opened on
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the entity directory
    pub fn entities_dir(&self) -> PathBuf {
        self.root.join(ENTITIES_DIR)
    }

    /// Absolute path for a named entity file
    pub fn entity_path(&self, name: &str) -> PathBuf {
        self.entities_dir().join(format!("{}.md", name))
    }

    /// Absolute path for a reserved log file
    pub fn log_path(&self, log: &str) -> PathBuf {
        self.entities_dir().join(format!("{}.md", log))
    }

    /// True when a file for this entity name exists
    pub fn entity_exists(&self, name: &str) -> bool {
        self.entity_path(name).is_file()
    }

    /// List addressable entity names in lexicographic order.
    ///
    /// Reserved log files are excluded; so is anything that is not a
    /// markdown file.
    pub async fn list_entities(&self) -> Result<Vec<String>> {
        let dir = self.entities_dir();
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if RESERVED_FILES.contains(&stem) {
                continue;
            }
            names.push(stem.to_string());
        }

        names.sort();
        Ok(names)
    }

    /// Read an entity body, retrying transient failures.
    ///
    /// A missing file reports `EntityNotFound` immediately (that is a caller
    /// error, not a transient fault). Other read errors retry up to three
    /// times with 100/400/1600 ms backoff before surfacing `IoTransient`.
    pub async fn read_entity(&self, name: &str) -> Result<String, CoreError> {
        let path = self.entity_path(name);
        if !path.is_file() {
            return Err(CoreError::EntityNotFound(name.to_string()));
        }

        let mut last_error = String::new();
        for (attempt, backoff_ms) in READ_BACKOFF_MS.iter().enumerate() {
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => return Ok(body),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Deleted between the existence check and the read
                    return Err(CoreError::EntityNotFound(name.to_string()));
                }
                Err(e) => {
                    tracing::warn!(
                        "read of entity '{}' failed (attempt {}): {}",
                        name,
                        attempt + 1,
                        e
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
                }
            }
        }

        Err(CoreError::IoTransient {
            attempts: READ_BACKOFF_MS.len() as u32,
            message: last_error,
        })
    }
}
