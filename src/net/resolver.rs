//! External-name resolution for aggregated backends.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::NameMapping;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no address mapping for service {0:?}")]
    NotFound(String),

    #[error("failed to read name mappings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse name mappings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct MappingsFile {
    #[serde(default)]
    mappings: Vec<NameMapping>,
}

/// Read a TOML file of `[[mappings]]` entries.
pub fn load_mappings_file(path: &Path) -> Result<Vec<NameMapping>, ResolveError> {
    let content = fs::read_to_string(path)?;
    let file: MappingsFile = toml::from_str(&content)?;
    Ok(file.mappings)
}

/// Current name → base URL table, swapped atomically on reload.
#[derive(Debug)]
pub struct NameMappings {
    table: ArcSwap<HashMap<String, Url>>,
}

impl NameMappings {
    pub fn new(mappings: Vec<NameMapping>) -> Self {
        Self {
            table: ArcSwap::from_pointee(to_table(mappings)),
        }
    }

    /// Replace the whole table. Later entries win on duplicate names.
    pub fn replace(&self, mappings: Vec<NameMapping>) {
        let table = to_table(mappings);
        tracing::info!(mappings = table.len(), "Name mappings updated");
        self.table.store(Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<Url> {
        self.table.load().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_table(mappings: Vec<NameMapping>) -> HashMap<String, Url> {
    mappings.into_iter().map(|m| (m.name, m.address)).collect()
}

/// Resolves backend service names to base URLs.
#[derive(Debug, Clone)]
pub struct ExternalNameResolver {
    mappings: Arc<NameMappings>,
}

impl ExternalNameResolver {
    pub fn new(mappings: Arc<NameMappings>) -> Self {
        Self { mappings }
    }

    pub fn resolve(&self, name: &str) -> Result<Url, ResolveError> {
        self.mappings
            .get(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }
}

/// Append a request path (and query) to a backend base URL.
///
/// The base path is kept as a prefix: `http://host/prefix/` + `/apis/g/v1`
/// gives `http://host/prefix/apis/g/v1`.
pub fn backend_url(base: &Url, path_and_query: &str) -> Result<Url, url::ParseError> {
    if base.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    url.set_query(query);
    url.set_fragment(None);
    Ok(url)
}

/// Watches a mappings file and reloads the table on change.
pub struct NameMappingWatcher {
    path: PathBuf,
    base: Vec<NameMapping>,
    mappings: Arc<NameMappings>,
}

impl NameMappingWatcher {
    /// `base` mappings come from the main config; file entries override them.
    pub fn new(path: &Path, base: Vec<NameMapping>, mappings: Arc<NameMappings>) -> Self {
        Self {
            path: path.to_path_buf(),
            base,
            mappings,
        }
    }

    /// Load the file once. The current table is kept on error.
    pub fn reload(&self) -> Result<usize, ResolveError> {
        let file_mappings = load_mappings_file(&self.path)?;
        let count = file_mappings.len();
        let mut merged = self.base.clone();
        merged.extend(file_mappings);
        self.mappings.replace(merged);
        Ok(count)
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for reloads to continue.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let handler = Arc::new(self);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Name mapping file change detected, reloading...");
                        if let Err(e) = handler.reload() {
                            tracing::error!(
                                error = %e,
                                "Failed to reload name mappings. Keeping current table."
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Name mapping watcher started");
        Ok(watcher)
    }
}
