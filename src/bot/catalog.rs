// src/bot/catalog.rs - Resolve free-text input to a canonical catalog entry

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use super::identity::normalize;

/// Immutable catalog snapshot shared with the engine
pub type CatalogSnapshot = Arc<Vec<String>>;

/// Find the canonical entry for `query`.
///
/// Exact normalized equality wins first, in catalog order. Only when no
/// entry is equal does the first entry containing the query match. An
/// empty normalized query matches nothing.
pub fn find_entry<'a>(query: &str, catalog: &'a [String]) -> Option<&'a str> {
    let needle = normalize(query);
    if needle.is_empty() {
        return None;
    }

    let normalized: Vec<String> = catalog.iter().map(|entry| normalize(entry)).collect();

    if let Some(index) = normalized.iter().position(|entry| *entry == needle) {
        return Some(catalog[index].as_str());
    }

    normalized
        .iter()
        .position(|entry| entry.contains(&needle))
        .map(|index| catalog[index].as_str())
}

/// Parse catalog file content: one entry per line, `#` comments and blanks skipped
pub fn parse_catalog(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// File-backed catalog with change notifications
pub struct CatalogStore {
    path: PathBuf,
    debounce: Duration,
}

impl CatalogStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            debounce: Duration::from_millis(500),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog from disk. A missing file is an empty catalog.
    pub async fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            warn!("Catalog file not found: {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", self.path.display()))?;

        let entries = parse_catalog(&content);
        debug!("Loaded {} catalog entries from {}", entries.len(), self.path.display());
        Ok(entries)
    }

    fn touches_catalog(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return false;
        }
        let file_name = self.path.file_name();
        event.paths.iter().any(|path| path.file_name() == file_name)
    }

    /// Watch the catalog file and send a fresh snapshot once a burst of changes settles.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    /// A reload that fails is logged and no snapshot is sent, so the previous
    /// one stays in effect.
    pub fn watch(self, updates: mpsc::Sender<Vec<String>>) -> Result<RecommendedWatcher> {
        let watch_dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = mpsc::channel(100);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to forward catalog watch event: {}", e);
                }
            }
        })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        info!("Watching catalog file {}", self.path.display());

        tokio::spawn(async move {
            // Reload once the file has been quiet for the debounce period, so a
            // truncate followed by a write is seen as a single change.
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) if self.touches_catalog(&event) => {
                            deadline = Some(Instant::now() + self.debounce);
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        match self.load().await {
                            Ok(entries) => {
                                info!("Catalog changed, reloaded {} entries", entries.len());
                                if updates.send(entries).await.is_err() {
                                    debug!("Catalog update receiver dropped, stopping watcher task");
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to reload catalog, keeping previous snapshot: {}", e),
                        }
                    }
                }
            }
        });

        Ok(watcher)
    }
}
