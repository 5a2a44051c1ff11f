//! Source registration
//!
//! Sources are registered explicitly with [`Registry::add`]. Each one
//! declares how it produces bookmarks, which files to watch, how watch
//! events are dispatched, and an optional polling interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Bookmark;
use crate::watch::Watch;

/// A source that reads bookmarks from local state (files, databases)
pub trait Loader: Send + Sync {
    fn load(&self) -> Result<Vec<Bookmark>>;
}

/// A source that fetches bookmarks from a remote service
pub trait Fetcher: Send + Sync {
    fn fetch(&self) -> Result<Vec<Bookmark>>;
}

/// How a source produces its bookmarks
#[derive(Clone)]
pub enum Producer {
    Loader(Arc<dyn Loader>),
    Fetcher(Arc<dyn Fetcher>),
}

impl Producer {
    pub fn produce(&self) -> Result<Vec<Bookmark>> {
        match self {
            Producer::Loader(loader) => loader.load(),
            Producer::Fetcher(fetcher) => fetcher.fetch(),
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Producer::Loader(_) => f.write_str("Loader"),
            Producer::Fetcher(_) => f.write_str("Fetcher"),
        }
    }
}

/// What happens when a watched file changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Reload once per event, without coalescing
    Direct,
    /// Coalesce a burst of events into a single reload
    #[default]
    Debounced,
}

/// Everything the engine needs to run one source
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub id: String,
    pub producer: Producer,
    pub watches: Vec<Watch>,
    pub policy: Policy,
    pub poll_interval: Option<Duration>,
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>, producer: Producer) -> Self {
        Self {
            id: id.into(),
            producer,
            watches: Vec::new(),
            policy: Policy::default(),
            poll_interval: None,
        }
    }

    pub fn watch(mut self, watch: Watch) -> Self {
        self.watches.push(watch);
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Source id cannot be empty")]
    EmptyId,

    #[error("Source '{0}' is already registered")]
    Duplicate(String),

    #[error("Source '{0}' has a zero poll interval")]
    ZeroPollInterval(String),
}

/// The set of sources the engine runs
#[derive(Debug, Default)]
pub struct Registry {
    modules: Vec<ModuleSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source
    pub fn add(&mut self, spec: ModuleSpec) -> Result<(), RegistryError> {
        if spec.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if self.get(&spec.id).is_some() {
            return Err(RegistryError::Duplicate(spec.id));
        }
        if spec.poll_interval == Some(Duration::ZERO) {
            return Err(RegistryError::ZeroPollInterval(spec.id));
        }
        self.modules.push(spec);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl IntoIterator for Registry {
    type Item = ModuleSpec;
    type IntoIter = std::vec::IntoIter<ModuleSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Bookmark>);

    impl Loader for Fixed {
        fn load(&self) -> Result<Vec<Bookmark>> {
            Ok(self.0.clone())
        }
    }

    impl Fetcher for Fixed {
        fn fetch(&self) -> Result<Vec<Bookmark>> {
            Ok(self.0.clone())
        }
    }

    fn spec(id: &str) -> ModuleSpec {
        ModuleSpec::new(id, Producer::Loader(Arc::new(Fixed(Vec::new()))))
    }

    #[test]
    fn test_add_and_get() {
        let mut registry = Registry::new();
        registry.add(spec("firefox")).unwrap();
        registry.add(spec("chrome")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("firefox").is_some());
        assert!(registry.get("safari").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.add(spec("firefox")).unwrap();
        assert_eq!(
            registry.add(spec("firefox")).unwrap_err(),
            RegistryError::Duplicate("firefox".to_string())
        );
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut registry = Registry::new();
        assert_eq!(registry.add(spec(" ")).unwrap_err(), RegistryError::EmptyId);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_poll_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .add(spec("api").poll_every(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err, RegistryError::ZeroPollInterval("api".to_string()));
    }

    #[test]
    fn test_producer_dispatch() {
        let bookmarks = vec![Bookmark::new("https://a.example")];
        let loader = Producer::Loader(Arc::new(Fixed(bookmarks.clone())));
        let fetcher = Producer::Fetcher(Arc::new(Fixed(bookmarks)));

        assert_eq!(loader.produce().unwrap().len(), 1);
        assert_eq!(fetcher.produce().unwrap().len(), 1);
    }

    #[test]
    fn test_policy_default_is_debounced() {
        assert_eq!(spec("x").policy, Policy::Debounced);
        assert_eq!(spec("x").policy(Policy::Direct).policy, Policy::Direct);
    }
}
