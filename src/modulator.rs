use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result};

/// A loaded module, keyed in the cache by its specifier.
pub struct ModuleSource {
    pub path: PathBuf,
    pub source: String,
}

/// Module cache keyed by resolved path, with prefix-based invalidation for
/// live-reload workflows.
pub struct Modulator {
    source_directory: PathBuf,
    cache: HashMap<String, ModuleSource>,
}

impl Modulator {
    pub fn new(source_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            cache: HashMap::new(),
        }
    }

    pub fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    /// Returns the cached module for `specifier`, reading it from disk on a
    /// miss. Specifiers are paths relative to the source directory.
    pub fn load(&mut self, specifier: &str) -> Result<&ModuleSource> {
        if !self.cache.contains_key(specifier) {
            let path = self.source_directory.join(specifier);
            let source = fs::read_to_string(&path)
                .with_context(|| format!("failed to load module {}", path.display()))?;
            self.cache
                .insert(specifier.to_string(), ModuleSource { path, source });
        }

        Ok(self.cache.get(specifier).expect("just inserted"))
    }

    pub fn is_cached(&self, specifier: &str) -> bool {
        self.cache.contains_key(specifier)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Evicts every entry whose specifier starts with `prefix`. An empty
    /// prefix clears the whole cache; entries that do not match stay put.
    pub fn clear_cache(&mut self, prefix: &str) {
        let before = self.cache.len();
        self.cache.retain(|specifier, _| !specifier.starts_with(prefix));

        tracing::debug!(
            target: "pawnhost",
            prefix,
            evicted = before - self.cache.len(),
            "module cache invalidated"
        );
    }
}
