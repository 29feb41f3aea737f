//! Shared key-value text store used to pass context between roles and missions.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const RESUME_KEY: &str = "user:resume:raw";
pub const ARTIFACT_PREFIX: &str = "artifact:";
pub const MIN_RESUME_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("memory key '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
}

/// Point-in-time copy of the store, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub entries: Vec<MemoryEntry>,
}

impl MemorySnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render entries as a context block for the text-generation prompt.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "<no stored context>".to_string();
        }
        self.entries
            .iter()
            .map(|entry| format!("- {}: {}", entry.key, entry.value))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLoadStatus {
    Loaded { chars: usize },
    Missing,
    TooShort { chars: usize },
}

impl FileLoadStatus {
    pub fn label(self) -> String {
        match self {
            FileLoadStatus::Loaded { chars } => format!("loaded ({chars} chars)"),
            FileLoadStatus::Missing => "missing".to_string(),
            FileLoadStatus::TooShort { chars } => {
                format!("too short ({chars} chars < {MIN_RESUME_CHARS})")
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    values: HashMap<String, String>,
    order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<MemoryTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed<I, K, V>(seed: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in seed {
            store.put(key, value);
        }
        store
    }

    /// Insert or overwrite. The whole value is swapped under the write lock,
    /// so a concurrent `get` sees either the old or the new value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        if table.values.insert(key.clone(), value).is_none() {
            table.order.push(key);
        }
    }

    pub fn get(&self, key: &str) -> std::result::Result<String, MemoryError> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(key.to_string()))
    }

    /// `get` with the empty-context fallback every role uses.
    pub fn get_or_default(&self, key: &str) -> String {
        match self.get(key) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key = key, error = %err, "memory miss, using empty context");
                String::new()
            }
        }
    }

    pub fn list_keys(&self) -> Vec<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.order.clone()
    }

    pub fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let entries = table
            .order
            .iter()
            .filter_map(|key| {
                table.values.get(key).map(|value| MemoryEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        MemorySnapshot { entries }
    }

    /// Read a text document from disk into `key`. Missing or near-empty files
    /// leave the current value untouched.
    pub fn load_file(&self, key: &str, path: &Path) -> Result<FileLoadStatus> {
        if !path.exists() {
            tracing::warn!(key = key, path = %path.display(), "memory source file not found");
            return Ok(FileLoadStatus::Missing);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read memory source file '{}'", path.display()))?;
        let chars = content.trim().chars().count();
        if chars < MIN_RESUME_CHARS {
            tracing::warn!(
                key = key,
                path = %path.display(),
                chars,
                "memory source file is empty or too short, keeping previous value"
            );
            return Ok(FileLoadStatus::TooShort { chars });
        }

        self.put(key, content);
        tracing::info!(key = key, path = %path.display(), chars, "loaded memory source file");
        Ok(FileLoadStatus::Loaded { chars })
    }

    /// Store a generated document under `artifact:<name>` and, when an output
    /// directory is given, mirror it to `<dir>/<name>.txt`.
    pub fn save_artifact(
        &self,
        name: &str,
        content: &str,
        output_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        self.put(format!("{ARTIFACT_PREFIX}{name}"), content);

        let Some(dir) = output_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create artifact directory '{}'", dir.display()))?;
        let path = dir.join(format!("{}.txt", artifact_file_stem(name)));
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write artifact '{}'", path.display()))?;
        tracing::info!(artifact = name, path = %path.display(), chars = content.len(), "saved artifact");
        Ok(Some(path))
    }
}

fn artifact_file_stem(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Values present before any résumé upload or profile override.
pub fn default_seed() -> Vec<(String, String)> {
    [
        (RESUME_KEY, "Placeholder resume content."),
        ("user:preferences:location", "San Francisco, CA"),
        ("user:preferences:salary", "$120,000+"),
        (
            "user:coaching:layoff_reason",
            "I was part of a major workforce reduction due to global economic slowdown in Q3 2024.",
        ),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}
