//! Persistence of the analyses configuration document
//!
//! One JSON file per deployment describes every known analysis (its kind,
//! enabled flag, last persisted status, team). The document is the durable
//! shadow of the engine's registry: it is rewritten after every mutating
//! operation and is the source the registry is rebuilt from at startup.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::ConfigDocument;

/// Loads, caches, and writes the configuration document.
///
/// The engine owns exactly one `ConfigStore`; merge semantics against the
/// live registry live in the engine, which alone knows about runtime state.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Option<ConfigDocument>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: None,
        }
    }

    /// Read the document from disk. A missing file is not an error: a
    /// default empty document is synthesized and persisted so the next load
    /// finds it. Any other read failure propagates.
    pub async fn load(&mut self) -> Result<ConfigDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let doc: ConfigDocument = serde_json::from_str(&raw)?;
                self.cache = Some(doc.clone());
                tracing::info!(analyses = doc.analyses.len(), "Configuration loaded");
                Ok(doc)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No existing config document, creating a new one");
                let doc = ConfigDocument::default();
                self.save(doc.clone()).await?;
                Ok(doc)
            }
            Err(e) => Err(Error::io(
                format!("failed to read config document {}", self.path.display()),
                e,
            )),
        }
    }

    /// A defensive copy of the cached document (default if never loaded).
    pub fn document(&self) -> ConfigDocument {
        self.cache.clone().unwrap_or_default()
    }

    /// The schema tag of the cached document.
    pub fn version(&self) -> String {
        self.cache
            .as_ref()
            .map(|d| d.version.clone())
            .unwrap_or_else(|| crate::types::CONFIG_DOCUMENT_VERSION.to_string())
    }

    /// Serialize the document in a single full-file write and refresh the
    /// cache. Callers must not report success to *their* callers before this
    /// returns.
    pub async fn save(&mut self, doc: ConfigDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }
        let raw = serde_json::to_string_pretty(&doc)?;
        tokio::fs::write(&self.path, raw).await.map_err(|e| {
            Error::io(
                format!("failed to write config document {}", self.path.display()),
                e,
            )
        })?;
        self.cache = Some(doc);
        Ok(())
    }
}
