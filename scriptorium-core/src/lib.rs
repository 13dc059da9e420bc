//! # scriptorium-core
//!
//! Core library for scriptorium - an analysis lifecycle and versioning
//! engine for user-uploaded scripts.
//!
//! This library provides:
//! - The lifecycle controller that starts, stops, updates, renames, rolls
//!   back, and deletes analyses while keeping registry, configuration
//!   document, and on-disk tree consistent
//! - Deduplicated version history of each analysis's source content
//! - Two-tier (memory + file) execution log retrieval
//! - Encrypted environment variable storage
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Three sources of truth are kept mutually consistent:
//! - **Registry:** in-memory records of every analysis, runtime state included
//! - **Configuration document:** the persisted subset the registry is rebuilt
//!   from on restart
//! - **Directory tree:** per-analysis source, versions, logs, and environment
//!
//! All mutation flows through [`AnalysisEngine`], which holds an exclusive
//! per-name lock across any stop/mutate/restart sequence.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scriptorium_core::{
//!     AnalysisEngine, AnalysisKind, ChaChaCipher, Config, EngineSettings,
//!     LoggingRuntime, OpenTeamDirectory,
//! };
//!
//! # async fn run() -> scriptorium_core::Result<()> {
//! let config = Config::load()?;
//! let engine = AnalysisEngine::new(
//!     EngineSettings::from_config(&config),
//!     Arc::new(LoggingRuntime),
//!     Arc::new(OpenTeamDirectory),
//!     Arc::new(ChaChaCipher::load_or_generate(&Config::env_key_path())?),
//! );
//! engine.initialize().await?;
//! engine.run("my-analysis", AnalysisKind::Listener).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use engine::{AnalysisEngine, AnalysisRecord, EngineSettings, INITIAL_LOG_LIMIT};
pub use env::{ChaChaCipher, Cipher};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
pub use layout::StorageLayout;
pub use runtime::{
    LoggingRuntime, OpenTeamDirectory, ProcessRuntime, StartRequest, StaticTeamDirectory,
    TeamDirectory,
};
pub use types::*;

// Public modules
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod events;
pub mod format;
pub mod layout;
pub mod logging;
pub mod logs;
pub mod runtime;
pub mod store;
pub mod types;
pub mod versions;
