//! Version history of analysis source content
//!
//! Snapshots are deduplicated by byte equality, not by hash: saving is a
//! no-op when the live content already exists under any stored version
//! number, so identical content is never stored twice. The scan is O(number
//! of versions); a content-hash index would preserve the observable behavior
//! if that ever matters.
//!
//! `currentVersion` in the metadata tracks which snapshot equals the live
//! file. Because the live file can be rewritten outside `save_version`
//! (updates, rollbacks), readers reconcile it lazily against the actual
//! content instead of trusting the stored value.

use chrono::Utc;

use crate::error::{Error, Result};
use crate::layout::StorageLayout;
use crate::types::{VersionEntry, VersionMetadata};

/// Per-analysis snapshot store under `versions/`.
#[derive(Debug, Clone)]
pub struct VersionStore {
    layout: StorageLayout,
}

impl VersionStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    async fn load_metadata(&self, name: &str) -> Result<Option<VersionMetadata>> {
        let path = self.layout.metadata_path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(
                format!("failed to read version metadata {}", path.display()),
                e,
            )),
        }
    }

    async fn persist_metadata(&self, name: &str, meta: &VersionMetadata) -> Result<()> {
        let path = self.layout.metadata_path(name);
        let raw = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(&path, raw).await.map_err(|e| {
            Error::io(
                format!("failed to write version metadata {}", path.display()),
                e,
            )
        })
    }

    async fn read_live(&self, name: &str) -> Result<String> {
        let path = self.layout.source_path(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::io(format!("failed to read source {}", path.display()), e))
    }

    /// Snapshot freshly uploaded content as version 1 and write the initial
    /// metadata. Called once, right after the live file is first written.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.layout.versions_dir(name))
            .await
            .map_err(|e| Error::io("failed to create versions directory", e))?;

        let content = self.read_live(name).await?;
        tokio::fs::write(self.layout.version_path(name, 1), &content)
            .await
            .map_err(|e| Error::io("failed to write version 1", e))?;

        let meta = VersionMetadata {
            versions: vec![VersionEntry {
                version: 1,
                timestamp: Utc::now(),
                size: content.len() as u64,
            }],
            next_version_number: 2,
            current_version: 1,
        };
        self.persist_metadata(name, &meta).await
    }

    /// Store the live content as a new version unless identical content is
    /// already stored. Returns the new version number, or `None` when the
    /// content was already captured ("no version created").
    ///
    /// Absent metadata marks a pre-versioning analysis: its first save is
    /// written as version 1, distinct from the normal next-number path.
    pub async fn save_version(&self, name: &str) -> Result<Option<u32>> {
        tokio::fs::create_dir_all(self.layout.versions_dir(name))
            .await
            .map_err(|e| Error::io("failed to create versions directory", e))?;

        let existing = self.load_metadata(name).await?;
        let is_first_save = existing.is_none();
        let mut meta = existing.unwrap_or(VersionMetadata {
            versions: Vec::new(),
            next_version_number: 1,
            current_version: 0,
        });

        let live = self.read_live(name).await?;

        // A snapshot that cannot be read cannot match.
        for entry in &meta.versions {
            let path = self.layout.version_path(name, entry.version);
            if let Ok(stored) = tokio::fs::read_to_string(&path).await {
                if stored == live {
                    return Ok(None);
                }
            }
        }

        let new_version = if is_first_save {
            1
        } else {
            meta.next_version_number
        };
        tokio::fs::write(self.layout.version_path(name, new_version), &live)
            .await
            .map_err(|e| Error::io(format!("failed to write version {new_version}"), e))?;

        meta.versions.push(VersionEntry {
            version: new_version,
            timestamp: Utc::now(),
            size: live.len() as u64,
        });
        if is_first_save {
            meta.next_version_number = 2;
            meta.current_version = 1;
        } else {
            meta.current_version = new_version;
            meta.next_version_number += 1;
        }
        self.persist_metadata(name, &meta).await?;

        Ok(Some(new_version))
    }

    /// Metadata with `current_version` reconciled against the live file: the
    /// first stored version with identical content wins; no match means the
    /// live content is an unsaved draft and `next_version_number` is
    /// reported. Absent metadata yields the pre-versioning default.
    pub async fn versions(&self, name: &str) -> Result<VersionMetadata> {
        let Some(mut meta) = self.load_metadata(name).await? else {
            return Ok(VersionMetadata::pre_versioning());
        };

        if let Ok(live) = self.read_live(name).await {
            let mut matched = false;
            for entry in &meta.versions {
                let path = self.layout.version_path(name, entry.version);
                if let Ok(stored) = tokio::fs::read_to_string(&path).await {
                    if stored == live {
                        meta.current_version = entry.version;
                        matched = true;
                        break;
                    }
                }
            }
            if !matched {
                meta.current_version = meta.next_version_number;
            }
        }

        Ok(meta)
    }

    /// Content of one version; `0` means the live file.
    pub async fn version_content(&self, name: &str, version: u32) -> Result<String> {
        if version == 0 {
            return self.read_live(name).await;
        }

        let path = self.layout.version_path(name, version);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::VersionNotFound {
                analysis: name.to_string(),
                version,
            }),
            Err(e) => Err(Error::io(
                format!("failed to read version {}", path.display()),
                e,
            )),
        }
    }

    /// Whether a snapshot file exists for this version number.
    pub async fn has_version(&self, name: &str, version: u32) -> bool {
        tokio::fs::try_exists(self.layout.version_path(name, version))
            .await
            .unwrap_or(false)
    }

    /// After the live file was rewritten without a new snapshot, persist the
    /// corrected `current_version` if the new content matches a stored
    /// version. A draft (no match) leaves the metadata untouched.
    pub async fn reconcile_after_write(&self, name: &str) -> Result<()> {
        if self.load_metadata(name).await?.is_none() {
            return Ok(());
        }
        let meta = self.versions(name).await?;
        if meta
            .versions
            .iter()
            .any(|entry| entry.version == meta.current_version)
        {
            self.persist_metadata(name, &meta).await?;
        }
        Ok(())
    }

    /// Copy a stored version's content over the live file and record it as
    /// current. Fails with `VersionNotFound` before touching anything if the
    /// snapshot is absent.
    pub async fn restore(&self, name: &str, version: u32) -> Result<()> {
        let content = self.version_content(name, version).await?;
        let source = self.layout.source_path(name);
        tokio::fs::write(&source, &content)
            .await
            .map_err(|e| Error::io(format!("failed to write source {}", source.display()), e))?;

        let mut meta = self.versions(name).await?;
        meta.current_version = version;
        self.persist_metadata(name, &meta).await
    }
}
