//! Language registry: read-only lookup from language id to toolchain.
//!
//! Built once at startup and shared by reference; nothing mutates it after
//! construction.

use std::collections::HashMap;

use tracing::info;

use crate::toolchain::{builtin_toolchains, ToolchainDescriptor};

/// Immutable table of supported guest languages.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    toolchains: HashMap<String, ToolchainDescriptor>,
}

impl LanguageRegistry {
    /// Registry containing only the given descriptors.
    pub fn new(descriptors: impl IntoIterator<Item = ToolchainDescriptor>) -> Self {
        let toolchains = descriptors
            .into_iter()
            .map(|d| (d.language.clone(), d))
            .collect();
        Self { toolchains }
    }

    /// Registry with the built-in toolchains.
    pub fn builtin() -> Self {
        Self::new(builtin_toolchains())
    }

    /// Built-ins plus `extra`; entries in `extra` win on id collision.
    pub fn with_overrides(extra: impl IntoIterator<Item = ToolchainDescriptor>) -> Self {
        let mut registry = Self::builtin();
        for desc in extra {
            if registry.toolchains.contains_key(&desc.language) {
                info!(language = %desc.language, "Configured toolchain overrides built-in");
            }
            registry.toolchains.insert(desc.language.clone(), desc);
        }
        registry
    }

    pub fn get(&self, language: &str) -> Option<&ToolchainDescriptor> {
        self.toolchains.get(language)
    }

    pub fn contains(&self, language: &str) -> bool {
        self.toolchains.contains_key(language)
    }

    /// Supported language ids, sorted.
    pub fn languages(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.toolchains.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.toolchains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toolchains.is_empty()
    }
}
