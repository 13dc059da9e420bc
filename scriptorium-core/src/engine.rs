//! The process lifecycle controller
//!
//! [`AnalysisEngine`] is the public contract of this crate: the only
//! component that touches the registry, the configuration document, the
//! version store, the log tiers, and the environment store together. Every
//! operation that follows the stop-if-running, mutate, restart-if-was-running
//! shape (update, rename, rollback, env change) holds an exclusive per-name lock
//! for its whole duration; operations on different names proceed
//! concurrently.
//!
//! The registry maps each name to either a plain config entry (loaded from
//! the document, untouched so far) or a live record carrying runtime-only
//! state. A config entry is upgraded to a live record (log ring rebuilt
//! from the file) the first time a lifecycle operation resolves it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::env::{Cipher, EnvStore};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::layout::StorageLayout;
use crate::logs::{self, MemoryLog};
use crate::runtime::{ProcessRuntime, StartRequest, TeamDirectory};
use crate::store::ConfigStore;
use crate::types::{
    AnalysisConfigEntry, AnalysisKind, AnalysisStatus, AnalysisSummary, AnalysisUpdate,
    ConfigDocument, LogEntry, LogPage, LogSource, RenameOutcome, RollbackOutcome, TimeRange,
    UpdateOutcome, VersionMetadata, UNCATEGORIZED_TEAM,
};
use crate::versions::VersionStore;

/// Limit used for the initial log snapshot pushed to new subscribers.
pub const INITIAL_LOG_LIMIT: usize = 50;

/// One managed analysis, with its runtime-only state.
///
/// Owned exclusively by the engine's registry; all mutation goes through the
/// engine, which persists the config-entry subset after every change.
#[derive(Debug)]
pub struct AnalysisRecord {
    pub name: String,
    pub kind: AnalysisKind,
    pub status: AnalysisStatus,
    pub enabled: bool,
    pub last_start_time: Option<DateTime<Utc>>,
    pub team_id: Option<String>,
    pub(crate) memory_logs: MemoryLog,
    pub(crate) log_sequence: u64,
    pub(crate) total_log_count: u64,
}

impl AnalysisRecord {
    fn new(name: &str, kind: AnalysisKind, log_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            status: AnalysisStatus::Stopped,
            enabled: false,
            last_start_time: None,
            team_id: None,
            memory_logs: MemoryLog::new(log_capacity),
            log_sequence: 0,
            total_log_count: 0,
        }
    }

    fn from_entry(name: &str, entry: &AnalysisConfigEntry, log_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: entry.kind,
            status: entry.status,
            enabled: entry.enabled,
            last_start_time: entry.last_start_time,
            team_id: entry.team_id.clone(),
            memory_logs: MemoryLog::new(log_capacity),
            log_sequence: 0,
            total_log_count: 0,
        }
    }

    /// The persisted subset of this record.
    pub fn config_entry(&self) -> AnalysisConfigEntry {
        AnalysisConfigEntry {
            kind: self.kind,
            enabled: self.enabled,
            status: self.status,
            last_start_time: self.last_start_time,
            team_id: self.team_id.clone(),
        }
    }
}

/// Registry slot: a document entry not yet touched by any lifecycle
/// operation, or a live record.
#[derive(Debug)]
enum AnalysisSlot {
    ConfigOnly(AnalysisConfigEntry),
    Live(AnalysisRecord),
}

impl AnalysisSlot {
    fn config_entry(&self) -> AnalysisConfigEntry {
        match self {
            AnalysisSlot::ConfigOnly(entry) => entry.clone(),
            AnalysisSlot::Live(record) => record.config_entry(),
        }
    }

    fn status(&self) -> AnalysisStatus {
        match self {
            AnalysisSlot::ConfigOnly(entry) => entry.status,
            AnalysisSlot::Live(record) => record.status,
        }
    }
}

/// Paths and tunables the engine is constructed from.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory holding one subdirectory per analysis
    pub analyses_dir: PathBuf,
    /// Location of the analyses configuration document
    pub registry_path: PathBuf,
    /// Entries kept per in-memory log ring
    pub memory_log_capacity: usize,
}

impl EngineSettings {
    pub fn new(analyses_dir: impl Into<PathBuf>, registry_path: impl Into<PathBuf>) -> Self {
        Self {
            analyses_dir: analyses_dir.into(),
            registry_path: registry_path.into(),
            memory_log_capacity: 500,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            analyses_dir: config.analyses_dir(),
            registry_path: config.registry_path(),
            memory_log_capacity: config.engine.memory_log_capacity,
        }
    }
}

/// The lifecycle engine. See the module docs for the locking discipline.
pub struct AnalysisEngine {
    layout: StorageLayout,
    version_store: VersionStore,
    env_store: EnvStore,
    store: Mutex<ConfigStore>,
    registry: Mutex<HashMap<String, AnalysisSlot>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    runtime: Arc<dyn ProcessRuntime>,
    teams: Arc<dyn TeamDirectory>,
    events: EventBus,
    memory_log_capacity: usize,
}

impl AnalysisEngine {
    pub fn new(
        settings: EngineSettings,
        runtime: Arc<dyn ProcessRuntime>,
        teams: Arc<dyn TeamDirectory>,
        cipher: Arc<dyn Cipher>,
    ) -> Self {
        let layout = StorageLayout::new(settings.analyses_dir);
        Self {
            version_store: VersionStore::new(layout.clone()),
            env_store: EnvStore::new(layout.clone(), cipher),
            layout,
            store: Mutex::new(ConfigStore::new(settings.registry_path)),
            registry: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            runtime,
            teams,
            events: EventBus::default(),
            memory_log_capacity: settings.memory_log_capacity,
        }
    }

    /// Receiver for all engine events, for the push layer.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ============================================
    // Startup
    // ============================================

    /// Load the configuration document and rebuild the registry from it,
    /// resolving log state for every analysis found on disk.
    pub async fn initialize(&self) -> Result<()> {
        self.layout.ensure_root().await?;

        let doc = {
            let mut store = self.store.lock().await;
            store.load().await?
        };

        {
            let mut registry = self.registry.lock().await;
            registry.clear();
            for (name, entry) in &doc.analyses {
                registry.insert(name.clone(), AnalysisSlot::ConfigOnly(entry.clone()));
            }
        }

        // Analyses present on disk become live records immediately; document
        // entries without a directory stay config-only.
        let mut dir = tokio::fs::read_dir(self.layout.root())
            .await
            .map_err(|e| Error::io("failed to scan analyses directory", e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::io("failed to scan analyses directory", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let has_source = tokio::fs::try_exists(self.layout.source_path(&name))
                .await
                .unwrap_or(false);
            if !has_source {
                continue;
            }

            let mut registry = self.registry.lock().await;
            registry
                .entry(name.clone())
                .or_insert_with(|| AnalysisSlot::ConfigOnly(AnalysisConfigEntry::default()));
            if let Err(e) = self.resolve_live(&mut registry, &name).await {
                tracing::error!(analysis = %name, error = %e, "failed to load analysis");
            }
        }

        Ok(())
    }

    /// Start every analysis that was running when the document was last
    /// saved, plus every enabled one. Failures are logged per analysis and
    /// do not stop the sweep. Returns how many started.
    pub async fn start_enabled(&self) -> Result<usize> {
        let doc = self.config_document().await;
        let mut started = 0;
        for (name, entry) in &doc.analyses {
            if entry.status.is_running() || entry.enabled {
                tracing::info!(analysis = %name, "restarting analysis");
                match self.run(name, entry.kind).await {
                    Ok(_) => started += 1,
                    Err(e) => {
                        tracing::error!(analysis = %name, error = %e, "failed to restart analysis")
                    }
                }
            }
        }
        Ok(started)
    }

    // ============================================
    // Registry plumbing
    // ============================================

    /// The exclusive section for one analysis name.
    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve a slot to a live record, upgrading a config-only entry (log
    /// state rebuilt from the file) on first touch.
    async fn resolve_live<'a>(
        &self,
        registry: &'a mut HashMap<String, AnalysisSlot>,
        name: &str,
    ) -> Result<&'a mut AnalysisRecord> {
        let Some(slot) = registry.get_mut(name) else {
            return Err(Error::AnalysisNotFound(name.to_string()));
        };

        if let AnalysisSlot::ConfigOnly(entry) = slot {
            let mut record = AnalysisRecord::from_entry(name, entry, self.memory_log_capacity);
            let (total, last_sequence, tail) =
                logs::rebuild_state(&self.layout.log_path(name), self.memory_log_capacity).await?;
            record.total_log_count = total;
            record.log_sequence = last_sequence;
            record.memory_logs.replace(tail);
            *slot = AnalysisSlot::Live(record);
        }

        match registry.get_mut(name) {
            Some(AnalysisSlot::Live(record)) => Ok(record),
            _ => Err(Error::AnalysisNotFound(name.to_string())),
        }
    }

    fn snapshot_document(registry: &HashMap<String, AnalysisSlot>, version: String) -> ConfigDocument {
        let mut analyses = BTreeMap::new();
        for (name, slot) in registry {
            analyses.insert(name.clone(), slot.config_entry());
        }
        ConfigDocument { version, analyses }
    }

    /// Serialize the registry's persisted subset back to disk. Called after
    /// every mutation, before success is reported.
    async fn save_config(&self) -> Result<()> {
        let registry = self.registry.lock().await;
        let mut store = self.store.lock().await;
        let doc = Self::snapshot_document(&registry, store.version());
        store.save(doc).await
    }

    // ============================================
    // Configuration document
    // ============================================

    /// Defensive copy of the cached configuration document.
    pub async fn config_document(&self) -> ConfigDocument {
        self.store.lock().await.document()
    }

    /// Merge an externally supplied document into the live registry without
    /// discarding runtime state: entries present in both overwrite only the
    /// persisted fields in place; names absent from the new document are
    /// dropped; new names are added as plain config entries. Always persists.
    pub async fn update_config_document(&self, doc: ConfigDocument) -> Result<()> {
        {
            let mut registry = self.registry.lock().await;

            for (name, slot) in registry.iter_mut() {
                if let Some(entry) = doc.analyses.get(name) {
                    match slot {
                        AnalysisSlot::Live(record) => {
                            record.kind = entry.kind;
                            record.enabled = entry.enabled;
                            record.status = entry.status;
                            record.last_start_time = entry.last_start_time;
                            record.team_id = entry.team_id.clone();
                        }
                        AnalysisSlot::ConfigOnly(existing) => {
                            *existing = entry.clone();
                        }
                    }
                }
            }

            registry.retain(|name, _| doc.analyses.contains_key(name));

            for (name, entry) in &doc.analyses {
                if !registry.contains_key(name) {
                    registry.insert(name.clone(), AnalysisSlot::ConfigOnly(entry.clone()));
                }
            }
        }

        let registry = self.registry.lock().await;
        let mut store = self.store.lock().await;
        let snapshot = Self::snapshot_document(&registry, doc.version);
        store.save(snapshot).await
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Current status; unknown names read as stopped.
    pub async fn status(&self, name: &str) -> AnalysisStatus {
        let registry = self.registry.lock().await;
        registry
            .get(name)
            .map(|slot| slot.status())
            .unwrap_or(AnalysisStatus::Stopped)
    }

    /// Start an analysis, creating a defaulted record first if the name is
    /// unknown. Starting an already-running analysis is safe.
    pub async fn run(&self, name: &str, kind: AnalysisKind) -> Result<AnalysisStatus> {
        StorageLayout::validate_name(name)?;
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.run_locked(name, kind).await
    }

    async fn run_locked(&self, name: &str, kind: AnalysisKind) -> Result<AnalysisStatus> {
        let created = {
            let mut registry = self.registry.lock().await;
            if registry.contains_key(name) {
                false
            } else {
                tracing::info!(analysis = %name, "creating new analysis record");
                registry.insert(
                    name.to_string(),
                    AnalysisSlot::Live(AnalysisRecord::new(name, kind, self.memory_log_capacity)),
                );
                true
            }
        };
        if created {
            self.save_config().await?;
        }

        self.start_record(name).await
    }

    /// Signal the runtime and record the outcome. A failed start leaves the
    /// analysis in the error state, persisted, and propagates the failure.
    async fn start_record(&self, name: &str) -> Result<AnalysisStatus> {
        let request = {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            StartRequest {
                name: record.name.clone(),
                kind: record.kind,
                source_path: self.layout.source_path(name),
            }
        };

        let outcome = self.runtime.start(&request).await;
        let status = match &outcome {
            Ok(()) => AnalysisStatus::Running,
            Err(_) => AnalysisStatus::Error,
        };

        {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            record.status = status;
            if status.is_running() {
                record.last_start_time = Some(Utc::now());
            }
        }
        self.save_config().await?;
        self.events.emit(EngineEvent::StatusChanged {
            analysis: name.to_string(),
            status,
        });

        outcome.map(|_| status)
    }

    /// Stop an analysis. Stopping a stopped analysis is a no-op at the
    /// runtime's discretion.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.stop_record(name).await
    }

    /// A failed stop propagates without touching the record: callers must
    /// not proceed to mutate state behind a still-running worker.
    async fn stop_record(&self, name: &str) -> Result<()> {
        {
            let mut registry = self.registry.lock().await;
            self.resolve_live(&mut registry, name).await?;
        }

        self.runtime.stop(name).await?;

        {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            record.status = AnalysisStatus::Stopped;
        }
        self.save_config().await?;
        self.events.emit(EngineEvent::StatusChanged {
            analysis: name.to_string(),
            status: AnalysisStatus::Stopped,
        });
        Ok(())
    }

    // ============================================
    // Creation, update, rename, delete
    // ============================================

    /// Register a freshly uploaded script: directory tree, live source,
    /// empty env file, version 1 snapshot, registry entry, persisted config.
    pub async fn create_analysis(
        &self,
        name: &str,
        content: &str,
        kind: AnalysisKind,
        team_id: Option<&str>,
    ) -> Result<()> {
        StorageLayout::validate_name(name)?;
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        {
            let registry = self.registry.lock().await;
            if registry.contains_key(name) {
                return Err(Error::Conflict(format!("analysis '{name}' already exists")));
            }
        }
        if tokio::fs::try_exists(self.layout.base_dir(name))
            .await
            .unwrap_or(false)
        {
            return Err(Error::Conflict(format!("analysis '{name}' already exists")));
        }

        self.layout.create_directories(name).await?;
        let source = self.layout.source_path(name);
        tokio::fs::write(&source, content)
            .await
            .map_err(|e| Error::io(format!("failed to write source {}", source.display()), e))?;
        tokio::fs::write(self.layout.env_path(name), "")
            .await
            .map_err(|e| Error::io("failed to create env file", e))?;

        let team = team_id.unwrap_or(UNCATEGORIZED_TEAM).to_string();
        {
            let mut registry = self.registry.lock().await;
            let mut record = AnalysisRecord::new(name, kind, self.memory_log_capacity);
            record.team_id = Some(team.clone());
            registry.insert(name.to_string(), AnalysisSlot::Live(record));
        }
        self.save_config().await?;

        self.version_store.initialize(name).await?;
        self.teams.ensure_analysis_team(name, &team).await?;

        self.events.emit(EngineEvent::Created {
            analysis: name.to_string(),
        });
        Ok(())
    }

    /// Apply a partial update. A content change on a running analysis stops
    /// it first, captures the pre-update content as a version unless already
    /// saved, rewrites the live file, and restarts.
    pub async fn update_analysis(
        &self,
        name: &str,
        update: AnalysisUpdate,
    ) -> Result<UpdateOutcome> {
        if let Some(team) = &update.team_id {
            if !self.teams.team_exists(team).await? {
                return Err(Error::TeamNotFound(team.clone()));
            }
        }

        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let (was_running, kind) = {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            (record.status.is_running(), record.kind)
        };

        let content_changed = update.content.is_some();
        if was_running && content_changed {
            self.stop_record(name).await?;
            self.append_log(name, "Analysis stopped to update content")
                .await?;
        }

        let mut saved_version = None;
        if let Some(content) = &update.content {
            // Capture the outgoing content before it is overwritten.
            saved_version = self.version_store.save_version(name).await?;

            let source = self.layout.source_path(name);
            tokio::fs::write(&source, content).await.map_err(|e| {
                Error::io(format!("failed to write source {}", source.display()), e)
            })?;

            if saved_version.is_none() {
                // No snapshot was taken; the new live content may still equal
                // an existing version.
                self.version_store.reconcile_after_write(name).await?;
            }
        }

        {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            if let Some(team) = update.team_id {
                record.team_id = Some(team);
            }
            if let Some(enabled) = update.enabled {
                record.enabled = enabled;
            }
        }
        self.save_config().await?;

        let restarted = was_running && content_changed;
        if restarted {
            self.run_locked(name, kind).await?;
            let message = match saved_version {
                Some(v) => {
                    format!("Analysis updated successfully (previous version saved as v{v})")
                }
                None => {
                    "Analysis updated successfully (no version saved - content unchanged)"
                        .to_string()
                }
            };
            self.append_log(name, message).await?;
        }

        self.events.emit(EngineEvent::Updated {
            analysis: name.to_string(),
            restarted,
            saved_version,
        });
        Ok(UpdateOutcome {
            restarted,
            saved_version,
        })
    }

    /// Rename an analysis, carrying its registry entry (in-flight log state
    /// included) over to the new key.
    pub async fn rename_analysis(&self, name: &str, new_name: &str) -> Result<RenameOutcome> {
        StorageLayout::validate_name(new_name)?;
        if name == new_name {
            return Err(Error::Conflict(format!(
                "cannot rename: target '{new_name}' already exists"
            )));
        }

        // Both names lock, in lexicographic order so concurrent renames
        // cannot deadlock.
        let (first, second) = if name < new_name {
            (name, new_name)
        } else {
            (new_name, name)
        };
        let first_lock = self.name_lock(first).await;
        let _first_guard = first_lock.lock().await;
        let second_lock = self.name_lock(second).await;
        let _second_guard = second_lock.lock().await;

        let (was_running, kind, team_id) = {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            let info = (record.status.is_running(), record.kind, record.team_id.clone());
            if registry.contains_key(new_name) {
                return Err(Error::Conflict(format!(
                    "cannot rename: target '{new_name}' already exists"
                )));
            }
            info
        };
        if tokio::fs::try_exists(self.layout.base_dir(new_name))
            .await
            .unwrap_or(false)
        {
            return Err(Error::Conflict(format!(
                "cannot rename: target '{new_name}' already exists"
            )));
        }

        if was_running {
            self.stop_record(name).await?;
            self.append_log(name, "Stopping analysis for rename operation")
                .await?;
        }

        let from = self.layout.base_dir(name);
        let to = self.layout.base_dir(new_name);
        tokio::fs::rename(&from, &to).await.map_err(|e| {
            Error::io(
                format!("failed to rename {} to {}", from.display(), to.display()),
                e,
            )
        })?;

        {
            let mut registry = self.registry.lock().await;
            if let Some(slot) = registry.remove(name) {
                let slot = match slot {
                    AnalysisSlot::Live(mut record) => {
                        record.name = new_name.to_string();
                        AnalysisSlot::Live(record)
                    }
                    config_only => config_only,
                };
                registry.insert(new_name.to_string(), slot);
            }
        }

        self.append_log(
            new_name,
            format!("Analysis renamed from '{name}' to '{new_name}'"),
        )
        .await?;
        self.save_config().await?;
        self.teams
            .ensure_analysis_team(new_name, team_id.as_deref().unwrap_or(UNCATEGORIZED_TEAM))
            .await?;

        if was_running {
            self.run_locked(new_name, kind).await?;
            self.append_log(new_name, "Analysis restarted after rename operation")
                .await?;
        }

        self.events.emit(EngineEvent::Renamed {
            from: name.to_string(),
            to: new_name.to_string(),
        });
        Ok(RenameOutcome {
            restarted: was_running,
        })
    }

    /// Remove an analysis and everything under its directory.
    pub async fn delete_analysis(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let was_running = {
            let registry = self.registry.lock().await;
            match registry.get(name) {
                None => return Err(Error::AnalysisNotFound(name.to_string())),
                Some(slot) => slot.status().is_running(),
            }
        };
        if was_running {
            self.stop_record(name).await?;
        }

        let base = self.layout.base_dir(name);
        match tokio::fs::remove_dir_all(&base).await {
            Ok(()) => {}
            // Directory already gone: the registry entry is still dropped.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::io(
                    format!("failed to remove {}", base.display()),
                    e,
                ))
            }
        }

        {
            let mut registry = self.registry.lock().await;
            registry.remove(name);
        }
        self.save_config().await?;

        self.events.emit(EngineEvent::Deleted {
            analysis: name.to_string(),
        });
        Ok(())
    }

    // ============================================
    // Content and versions
    // ============================================

    /// Live source text.
    pub async fn content(&self, name: &str) -> Result<String> {
        self.version_store.version_content(name, 0).await
    }

    /// Version history, reconciled against the live file.
    pub async fn versions(&self, name: &str) -> Result<VersionMetadata> {
        self.version_store.versions(name).await
    }

    /// Content of a stored version; `0` means the live file.
    pub async fn version_content(&self, name: &str, version: u32) -> Result<String> {
        self.version_store.version_content(name, version).await
    }

    /// Snapshot the live content unless it is already stored.
    pub async fn save_version(&self, name: &str) -> Result<Option<u32>> {
        self.version_store.save_version(name).await
    }

    /// Restore a stored version over the live file, clearing logs, stopping
    /// and restarting the worker around the swap when it was running. The
    /// outgoing live content is snapshotted first so nothing is lost.
    pub async fn rollback_to_version(&self, name: &str, version: u32) -> Result<RollbackOutcome> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let (was_running, kind) = {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            (record.status.is_running(), record.kind)
        };

        if !self.version_store.has_version(name, version).await {
            return Err(Error::VersionNotFound {
                analysis: name.to_string(),
                version,
            });
        }

        if was_running {
            self.stop_record(name).await?;
            self.append_log(name, format!("Analysis stopped to rollback to version {version}"))
                .await?;
        }

        self.version_store.save_version(name).await?;
        self.version_store.restore(name, version).await?;

        self.clear_logs(name).await?;
        self.append_log(name, format!("Rolled back to version {version}"))
            .await?;

        if was_running {
            self.run_locked(name, kind).await?;
            self.append_log(name, "Analysis restarted after rollback").await?;
        }

        self.events.emit(EngineEvent::RolledBack {
            analysis: name.to_string(),
            version,
            restarted: was_running,
        });
        Ok(RollbackOutcome {
            restarted: was_running,
            version,
        })
    }

    // ============================================
    // Logs
    // ============================================

    /// Record one execution log entry for a known analysis. Unknown names
    /// are ignored: producers may race a delete.
    pub async fn append_log(&self, name: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let entry = {
            let mut registry = self.registry.lock().await;
            if !registry.contains_key(name) {
                return Ok(());
            }
            let record = self.resolve_live(&mut registry, name).await?;
            record.log_sequence += 1;
            record.total_log_count += 1;
            let entry = LogEntry {
                sequence: record.log_sequence,
                timestamp: Utc::now(),
                message,
            };
            record.memory_logs.push(entry.clone());
            // File write stays inside the critical section so file order
            // always matches sequence order.
            logs::append_line(&self.layout.log_path(name), &entry).await?;
            entry
        };

        self.events.emit(EngineEvent::LogAppended {
            analysis: name.to_string(),
            entry,
        });
        Ok(())
    }

    /// Paginated logs, most recent first. Page 1 prefers the memory ring;
    /// later pages (or an empty ring) fall back to the file.
    pub async fn logs(&self, name: &str, page: usize, limit: usize) -> Result<LogPage> {
        {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            if page <= 1 && !record.memory_logs.is_empty() {
                return Ok(LogPage {
                    entries: record.memory_logs.recent(limit),
                    has_more: record.total_log_count > limit as u64,
                    total_count: record.total_log_count,
                    source: LogSource::Memory,
                });
            }
        }

        logs::read_file_page(&self.layout.log_path(name), page, limit).await
    }

    /// Memory-tier snapshot for a freshly connected subscriber. Unknown
    /// names get an empty page rather than an error.
    pub async fn initial_logs(&self, name: &str, limit: usize) -> Result<LogPage> {
        let mut registry = self.registry.lock().await;
        if !registry.contains_key(name) {
            return Ok(LogPage::empty(LogSource::Memory));
        }
        let record = self.resolve_live(&mut registry, name).await?;
        Ok(LogPage {
            entries: record.memory_logs.recent(limit),
            has_more: record.total_log_count > limit as u64,
            total_count: record.total_log_count,
            source: LogSource::Memory,
        })
    }

    /// Raw log content filtered to a time window, for download.
    pub async fn download_logs(&self, name: &str, range: TimeRange) -> Result<String> {
        logs::filtered_content(&self.layout.log_path(name), name, range, Utc::now()).await
    }

    /// Truncate the log file and reset all in-memory log state to zero.
    /// Destructive and non-recoverable.
    pub async fn clear_logs(&self, name: &str) -> Result<()> {
        {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            logs::clear_file(&self.layout.log_path(name)).await?;
            record.memory_logs.clear();
            record.log_sequence = 0;
            record.total_log_count = 0;
        }

        self.events.emit(EngineEvent::LogsCleared {
            analysis: name.to_string(),
        });
        Ok(())
    }

    // ============================================
    // Environment
    // ============================================

    /// Decrypted environment variables, in file order.
    pub async fn environment(&self, name: &str) -> Result<Vec<(String, String)>> {
        self.env_store.read(name).await
    }

    /// Replace the environment, bouncing the worker around the write when it
    /// was running.
    pub async fn update_environment(
        &self,
        name: &str,
        vars: Vec<(String, String)>,
    ) -> Result<UpdateOutcome> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let (was_running, kind) = {
            let mut registry = self.registry.lock().await;
            let record = self.resolve_live(&mut registry, name).await?;
            (record.status.is_running(), record.kind)
        };

        if was_running {
            self.stop_record(name).await?;
            self.append_log(name, "Analysis stopped to update environment")
                .await?;
        }

        self.env_store.write(name, &vars).await?;

        if was_running {
            self.run_locked(name, kind).await?;
            self.append_log(name, "Analysis updated successfully").await?;
        }

        self.events.emit(EngineEvent::Updated {
            analysis: name.to_string(),
            restarted: was_running,
            saved_version: None,
        });
        Ok(UpdateOutcome {
            restarted: was_running,
            saved_version: None,
        })
    }

    // ============================================
    // Listing
    // ============================================

    /// Every analysis found on disk, with registry state merged in. Entries
    /// without a source file are skipped.
    pub async fn list_analyses(&self) -> Result<Vec<AnalysisSummary>> {
        let mut dir = tokio::fs::read_dir(self.layout.root())
            .await
            .map_err(|e| Error::io("failed to scan analyses directory", e))?;

        let registry = self.registry.lock().await;
        let mut summaries = Vec::new();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::io("failed to scan analyses directory", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = match tokio::fs::metadata(self.layout.source_path(&name)).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::io(
                        format!("failed to stat source for {name}"),
                        e,
                    ))
                }
            };

            let config = registry
                .get(&name)
                .map(|slot| slot.config_entry())
                .unwrap_or_default();
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            summaries.push(AnalysisSummary {
                name,
                size: crate::format::format_file_size(metadata.len()),
                created,
                kind: config.kind,
                status: config.status,
                enabled: config.enabled,
                last_start_time: config.last_start_time,
                team_id: config.team_id,
            });
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}
