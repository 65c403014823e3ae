use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use futures_util::future::join_all;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::loader::load_api_definition,
    ports::definition_source::{DefinitionSource, DiscoveredDefinition},
};

/// Events arriving within this window are coalesced into one reload per file.
const DEBOUNCE: Duration = Duration::from_millis(200);

fn is_definition_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// API definitions stored as one `.json` file per API in a directory.
pub struct DirectoryDefinitionSource {
    dir: PathBuf,
    // Kept alive for as long as the source is; dropping it ends the watch
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl DirectoryDefinitionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            watcher: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn definition_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read API directory {}", self.dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_definition_file(&path) && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl DefinitionSource for DirectoryDefinitionSource {
    async fn discover(&self) -> Result<Vec<DiscoveredDefinition>> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            tracing::warn!(
                "API directory {} does not exist, no APIs loaded",
                self.dir.display()
            );
            return Ok(Vec::new());
        }

        let files = self.definition_files().await?;
        tracing::debug!("Found {} API definition files in {}", files.len(), self.dir.display());

        // Read concurrently; results keep the sorted file order
        let definitions = join_all(files.iter().map(load_api_definition)).await;
        Ok(files
            .into_iter()
            .zip(definitions)
            .map(|(origin, definition)| DiscoveredDefinition { origin, definition })
            .collect())
    }

    fn watch(&self) -> Result<mpsc::Receiver<DiscoveredDefinition>> {
        let mut guard = self
            .watcher
            .lock()
            .map_err(|_| eyre!("Definition watcher lock poisoned"))?;
        if guard.is_some() {
            return Err(eyre!("Watch can only be called once"));
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) if event.kind.is_create() || event.kind.is_modify() => {
                        for path in event.paths.into_iter().filter(|p| is_definition_file(p)) {
                            let _ = raw_tx.send(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("API directory watch error: {:?}", e),
                }
            })?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch API directory {}", self.dir.display()))?;
        *guard = Some(watcher);

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(first) = raw_rx.recv().await {
                let mut pending = BTreeSet::from([first]);
                tokio::time::sleep(DEBOUNCE).await;
                while let Ok(path) = raw_rx.try_recv() {
                    pending.insert(path);
                }

                for origin in pending {
                    // Deleted files are left registered
                    if !tokio::fs::try_exists(&origin).await.unwrap_or(false) {
                        continue;
                    }
                    tracing::debug!("API definition changed: {}", origin.display());
                    let definition = load_api_definition(&origin).await;
                    if tx.send(DiscoveredDefinition { origin, definition }).await.is_err() {
                        return;
                    }
                }
            }
            tracing::debug!("API directory watcher stopped");
        });

        Ok(rx)
    }
}
