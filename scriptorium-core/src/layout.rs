//! On-disk layout of an analysis
//!
//! Every analysis owns one directory under the analyses root:
//!
//! ```text
//! <root>/<name>/
//!   script.js            live source (possibly unsaved edits)
//!   env/.env             encrypted environment variables
//!   logs/analysis.log    append-only execution log
//!   versions/v<n>.js     immutable stored snapshots
//!   versions/metadata.json
//! ```
//!
//! This module is the only place that knows these paths; everything else
//! addresses the tree through [`StorageLayout`].

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SOURCE_FILE: &str = "script.js";
const ENV_DIR: &str = "env";
const ENV_FILE: &str = ".env";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "analysis.log";
const VERSIONS_DIR: &str = "versions";
const METADATA_FILE: &str = "metadata.json";

/// Path arithmetic and directory creation for the per-analysis tree.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding one subdirectory per analysis.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that would escape the analyses root or collide with
    /// directory entries. Names double as directory names.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Validation("analysis name must not be empty".into()));
        }
        if name == "." || name == ".." {
            return Err(Error::Validation(format!("invalid analysis name: {name}")));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(Error::Validation(format!(
                "analysis name must not contain path separators: {name}"
            )));
        }
        Ok(())
    }

    pub fn base_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn source_path(&self, name: &str) -> PathBuf {
        self.base_dir(name).join(SOURCE_FILE)
    }

    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.base_dir(name).join(ENV_DIR)
    }

    pub fn env_path(&self, name: &str) -> PathBuf {
        self.env_dir(name).join(ENV_FILE)
    }

    pub fn logs_dir(&self, name: &str) -> PathBuf {
        self.base_dir(name).join(LOGS_DIR)
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir(name).join(LOG_FILE)
    }

    pub fn versions_dir(&self, name: &str) -> PathBuf {
        self.base_dir(name).join(VERSIONS_DIR)
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.versions_dir(name).join(METADATA_FILE)
    }

    pub fn version_path(&self, name: &str, version: u32) -> PathBuf {
        self.versions_dir(name).join(format!("v{version}.js"))
    }

    /// Create the analyses root itself.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::io(
                format!("failed to create analyses root {}", self.root.display()),
                e,
            )
        })
    }

    /// Create the full directory tree for one analysis. Idempotent:
    /// recreating existing directories is not an error.
    pub async fn create_directories(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        let base = self.base_dir(name);
        for dir in [
            base.clone(),
            self.env_dir(name),
            self.logs_dir(name),
            self.versions_dir(name),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
        }
        Ok(base)
    }
}
