use std::path::PathBuf;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ApiDefinition;

/// One API definition read from a source, or the reason it could not be read.
#[derive(Debug)]
pub struct DiscoveredDefinition {
    /// Where the definition came from, for logging
    pub origin: PathBuf,
    pub definition: Result<ApiDefinition>,
}

/// Trait for sources of API definitions that can be enumerated and watched.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Read every definition currently available, in a stable order.
    ///
    /// Fails only when the source as a whole is unusable; a single unreadable
    /// definition is reported through its own entry.
    async fn discover(&self) -> Result<Vec<DiscoveredDefinition>>;

    /// Return a channel that yields definitions as they are added or changed.
    /// Can only be taken once.
    fn watch(&self) -> Result<mpsc::Receiver<DiscoveredDefinition>>;
}
