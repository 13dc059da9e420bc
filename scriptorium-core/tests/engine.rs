//! Integration tests for the analysis lifecycle engine
//!
//! These tests drive [`AnalysisEngine`] end-to-end over temp directories,
//! with a recording process runtime standing in for the real worker spawner.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scriptorium_core::{
    AnalysisEngine, AnalysisKind, AnalysisStatus, AnalysisUpdate, ChaChaCipher, EngineEvent,
    EngineSettings, Error, LogSource, ProcessRuntime, Result, StartRequest, StaticTeamDirectory,
    TimeRange,
};
use tempfile::TempDir;

/// Runtime double that records every signal and can be told to refuse starts.
#[derive(Default)]
struct RecordingRuntime {
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
    fail_starts: Mutex<bool>,
}

impl RecordingRuntime {
    fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }

    fn refuse_starts(&self) {
        *self.fail_starts.lock().unwrap() = true;
    }
}

#[async_trait]
impl ProcessRuntime for RecordingRuntime {
    async fn start(&self, request: &StartRequest) -> Result<()> {
        if *self.fail_starts.lock().unwrap() {
            return Err(Error::Process("worker refused to start".to_string()));
        }
        self.starts.lock().unwrap().push(request.name.clone());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.stops.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

struct TestContext {
    _tmp: TempDir,
    engine: AnalysisEngine,
    runtime: Arc<RecordingRuntime>,
    settings: EngineSettings,
}

impl TestContext {
    /// A second engine over the same directories, as after a process restart.
    fn reopen(&self) -> AnalysisEngine {
        AnalysisEngine::new(
            self.settings.clone(),
            Arc::new(RecordingRuntime::default()),
            Arc::new(StaticTeamDirectory::new(["ops", "research"])),
            Arc::new(ChaChaCipher::new([1u8; 32])),
        )
    }
}

async fn context() -> TestContext {
    let tmp = TempDir::new().unwrap();
    let settings = EngineSettings::new(
        tmp.path().join("analyses"),
        tmp.path().join("analyses-config.json"),
    );
    let runtime = Arc::new(RecordingRuntime::default());
    let engine = AnalysisEngine::new(
        settings.clone(),
        runtime.clone(),
        Arc::new(StaticTeamDirectory::new(["ops", "research"])),
        Arc::new(ChaChaCipher::new([1u8; 32])),
    );
    engine.initialize().await.unwrap();
    TestContext {
        _tmp: tmp,
        engine,
        runtime,
        settings,
    }
}

const SCRIPT: &str = "module.exports = () => 'original';\n";

async fn create_foo(ctx: &TestContext) {
    ctx.engine
        .create_analysis("foo", SCRIPT, AnalysisKind::Listener, None)
        .await
        .unwrap();
}

// ============================================
// Creation
// ============================================

#[tokio::test]
async fn test_create_registers_and_snapshots_v1() {
    let ctx = context().await;
    create_foo(&ctx).await;

    // Live content and version 1 hold the uploaded script
    assert_eq!(ctx.engine.content("foo").await.unwrap(), SCRIPT);
    assert_eq!(ctx.engine.version_content("foo", 1).await.unwrap(), SCRIPT);

    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.versions.len(), 1);
    assert_eq!(meta.current_version, 1);
    assert_eq!(meta.next_version_number, 2);

    // Defaulted team lands in the persisted document
    let doc = ctx.engine.config_document().await;
    assert_eq!(doc.analyses["foo"].team_id.as_deref(), Some("uncategorized"));
    assert_eq!(doc.analyses["foo"].status, AnalysisStatus::Stopped);
}

#[tokio::test]
async fn test_create_existing_name_is_conflict() {
    let ctx = context().await;
    create_foo(&ctx).await;

    let err = ctx
        .engine
        .create_analysis("foo", "other", AnalysisKind::Listener, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_create_rejects_path_escaping_names() {
    let ctx = context().await;
    for bad in ["", "..", "a/b"] {
        let err = ctx
            .engine
            .create_analysis(bad, "x", AnalysisKind::Listener, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "name {bad:?}");
    }
}

// ============================================
// Lifecycle
// ============================================

#[tokio::test]
async fn test_run_and_stop_drive_the_runtime() {
    let ctx = context().await;
    create_foo(&ctx).await;

    let status = ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();
    assert_eq!(status, AnalysisStatus::Running);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Running);
    assert_eq!(ctx.runtime.starts(), vec!["foo"]);

    ctx.engine.stop("foo").await.unwrap();
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Stopped);
    assert_eq!(ctx.runtime.stops(), vec!["foo"]);
}

#[tokio::test]
async fn test_run_unknown_name_creates_a_record() {
    let ctx = context().await;
    ctx.engine.run("adhoc", AnalysisKind::Listener).await.unwrap();

    let doc = ctx.engine.config_document().await;
    assert!(doc.analyses.contains_key("adhoc"));
    assert_eq!(doc.analyses["adhoc"].status, AnalysisStatus::Running);
}

#[tokio::test]
async fn test_failed_start_persists_error_state() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.runtime.refuse_starts();

    let err = ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap_err();
    assert!(matches!(err, Error::Process(_)));
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Error);

    let doc = ctx.engine.config_document().await;
    assert_eq!(doc.analyses["foo"].status, AnalysisStatus::Error);
}

#[tokio::test]
async fn test_stop_unknown_name_is_not_found() {
    let ctx = context().await;
    let err = ctx.engine.stop("ghost").await.unwrap_err();
    assert!(matches!(err, Error::AnalysisNotFound(_)));
}

#[tokio::test]
async fn test_status_of_unknown_name_reads_stopped() {
    let ctx = context().await;
    assert_eq!(ctx.engine.status("ghost").await, AnalysisStatus::Stopped);
}

// ============================================
// Version dedup and update
// ============================================

#[tokio::test]
async fn test_save_version_is_dedup_idempotent() {
    let ctx = context().await;
    create_foo(&ctx).await;

    // Uploaded content is already stored as v1: both calls decline
    assert_eq!(ctx.engine.save_version("foo").await.unwrap(), None);
    assert_eq!(ctx.engine.save_version("foo").await.unwrap(), None);
    assert_eq!(ctx.engine.versions("foo").await.unwrap().versions.len(), 1);
}

#[tokio::test]
async fn test_update_captures_prior_content_once() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    // First update: prior content equals v1, so nothing new is captured
    let outcome = ctx
        .engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.restarted);
    assert_eq!(outcome.saved_version, None);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Running);

    // Second update: prior content "X" was never saved, captured as v2
    let outcome = ctx
        .engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("Y".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.saved_version, Some(2));
    assert_eq!(ctx.engine.version_content("foo", 2).await.unwrap(), "X");
    assert_eq!(ctx.engine.content("foo").await.unwrap(), "Y");

    // Worker was bounced around each content change
    assert_eq!(ctx.runtime.stops(), vec!["foo", "foo"]);
    assert_eq!(ctx.runtime.starts(), vec!["foo", "foo", "foo"]);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Running);
}

#[tokio::test]
async fn test_update_without_content_does_not_restart() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    let outcome = ctx
        .engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                enabled: Some(true),
                team_id: Some("ops".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!outcome.restarted);
    assert!(ctx.runtime.stops().is_empty());

    let doc = ctx.engine.config_document().await;
    assert!(doc.analyses["foo"].enabled);
    assert_eq!(doc.analyses["foo"].team_id.as_deref(), Some("ops"));
}

#[tokio::test]
async fn test_update_reverting_to_stored_content_fixes_current_version() {
    let ctx = context().await;
    create_foo(&ctx).await;

    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Live "X" is an unsaved draft
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.current_version, meta.next_version_number);

    // Updating back to the stored v1 content reconciles current_version
    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some(SCRIPT.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.current_version, 1);
}

#[tokio::test]
async fn test_update_with_unknown_team_is_rejected() {
    let ctx = context().await;
    create_foo(&ctx).await;

    let err = ctx
        .engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                team_id: Some("ghosts".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TeamNotFound(team) if team == "ghosts"));
}

// ============================================
// Rollback
// ============================================

#[tokio::test]
async fn test_rollback_fidelity_and_log_clearing() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.append_log("foo", "some noise").await.unwrap();

    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let outcome = ctx.engine.rollback_to_version("foo", 1).await.unwrap();
    assert!(!outcome.restarted);
    assert_eq!(outcome.version, 1);

    // Live content now equals the stored version byte-for-byte
    assert_eq!(
        ctx.engine.version_content("foo", 0).await.unwrap(),
        ctx.engine.version_content("foo", 1).await.unwrap()
    );
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.current_version, 1);

    // Pre-rollback logs are gone; only the rollback marker remains
    let page = ctx.engine.logs("foo", 1, 10).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert!(page.entries[0].message.contains("Rolled back to version 1"));
}

#[tokio::test]
async fn test_rollback_preserves_unsaved_draft_as_version() {
    let ctx = context().await;
    create_foo(&ctx).await;

    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("draft".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The unsaved draft is captured before the rollback overwrites it
    ctx.engine.rollback_to_version("foo", 1).await.unwrap();
    assert_eq!(ctx.engine.version_content("foo", 2).await.unwrap(), "draft");
}

#[tokio::test]
async fn test_rollback_restarts_running_analysis() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    let outcome = ctx.engine.rollback_to_version("foo", 1).await.unwrap();
    assert!(outcome.restarted);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Running);
    assert_eq!(ctx.runtime.stops(), vec!["foo"]);
}

#[tokio::test]
async fn test_rollback_to_missing_version_is_not_found() {
    let ctx = context().await;
    create_foo(&ctx).await;
    let err = ctx.engine.rollback_to_version("foo", 9).await.unwrap_err();
    assert!(matches!(err, Error::VersionNotFound { version: 9, .. }));
}

// ============================================
// Rename
// ============================================

#[tokio::test]
async fn test_rename_preserves_history_and_restarts() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    ctx.engine.save_version("foo").await.unwrap();
    let before = ctx.engine.versions("foo").await.unwrap();

    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();
    let outcome = ctx.engine.rename_analysis("foo", "bar").await.unwrap();
    assert!(outcome.restarted);

    // All of foo's versions are accessible as bar's, current unchanged
    let after = ctx.engine.versions("bar").await.unwrap();
    assert_eq!(after.versions, before.versions);
    assert_eq!(after.current_version, before.current_version);
    assert_eq!(ctx.engine.version_content("bar", 1).await.unwrap(), SCRIPT);

    // Registry moved with the record
    assert_eq!(ctx.engine.status("bar").await, AnalysisStatus::Running);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Stopped);
    let doc = ctx.engine.config_document().await;
    assert!(doc.analyses.contains_key("bar"));
    assert!(!doc.analyses.contains_key("foo"));

    // The restart targeted the new name
    assert_eq!(ctx.runtime.starts().last().unwrap(), "bar");
}

#[tokio::test]
async fn test_rename_missing_source_is_not_found() {
    let ctx = context().await;
    let err = ctx.engine.rename_analysis("ghost", "bar").await.unwrap_err();
    assert!(matches!(err, Error::AnalysisNotFound(_)));
}

#[tokio::test]
async fn test_rename_to_existing_target_is_conflict() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine
        .create_analysis("bar", "other", AnalysisKind::Listener, None)
        .await
        .unwrap();

    let err = ctx.engine.rename_analysis("foo", "bar").await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    // Nothing moved
    assert_eq!(ctx.engine.content("foo").await.unwrap(), SCRIPT);
}

// ============================================
// Delete
// ============================================

#[tokio::test]
async fn test_delete_removes_everything() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    ctx.engine.delete_analysis("foo").await.unwrap();

    // Stopped first, then gone from disk, registry, and document
    assert_eq!(ctx.runtime.stops(), vec!["foo"]);
    assert!(matches!(
        ctx.engine.content("foo").await.unwrap_err(),
        Error::Io { .. }
    ));
    assert!(!ctx.engine.config_document().await.analyses.contains_key("foo"));

    let err = ctx.engine.delete_analysis("foo").await.unwrap_err();
    assert!(matches!(err, Error::AnalysisNotFound(_)));
}

// ============================================
// Logs
// ============================================

#[tokio::test]
async fn test_log_pagination_boundary() {
    let ctx = context().await;
    create_foo(&ctx).await;
    for i in 1..=150 {
        ctx.engine.append_log("foo", format!("entry {i}")).await.unwrap();
    }

    // Page 1 is served from memory: 100 most recent, more available
    let page1 = ctx.engine.logs("foo", 1, 100).await.unwrap();
    assert_eq!(page1.source, LogSource::Memory);
    assert_eq!(page1.entries.len(), 100);
    assert_eq!(page1.entries[0].message, "entry 150");
    assert!(page1.has_more);
    assert_eq!(page1.total_count, 150);

    // Page 2 falls back to the file tier: the remaining 50
    let page2 = ctx.engine.logs("foo", 2, 100).await.unwrap();
    assert_eq!(page2.source, LogSource::File);
    assert_eq!(page2.entries.len(), 50);
    assert_eq!(page2.entries.last().unwrap().message, "entry 1");
    assert!(!page2.has_more);
    assert_eq!(page2.total_count, 150);
}

#[tokio::test]
async fn test_log_state_rebuilds_across_restart() {
    let ctx = context().await;
    create_foo(&ctx).await;
    for i in 1..=5 {
        ctx.engine.append_log("foo", format!("entry {i}")).await.unwrap();
    }

    let reopened = ctx.reopen();
    reopened.initialize().await.unwrap();

    // Ring rebuilt from the file: page 1 comes from memory again
    let page = reopened.logs("foo", 1, 10).await.unwrap();
    assert_eq!(page.source, LogSource::Memory);
    assert_eq!(page.total_count, 5);
    assert_eq!(page.entries[0].message, "entry 5");

    // New appends continue the sequence
    reopened.append_log("foo", "entry 6").await.unwrap();
    let page = reopened.logs("foo", 1, 10).await.unwrap();
    assert_eq!(page.entries[0].sequence, 6);
}

#[tokio::test]
async fn test_clear_logs_resets_both_tiers() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.append_log("foo", "before clear").await.unwrap();

    ctx.engine.clear_logs("foo").await.unwrap();

    let page = ctx.engine.logs("foo", 1, 10).await.unwrap();
    assert!(page.entries.is_empty());
    assert_eq!(page.total_count, 0);

    // Sequence restarts from one
    ctx.engine.append_log("foo", "after clear").await.unwrap();
    let page = ctx.engine.logs("foo", 1, 10).await.unwrap();
    assert_eq!(page.entries[0].sequence, 1);
}

#[tokio::test]
async fn test_logs_unknown_name_is_not_found() {
    let ctx = context().await;
    let err = ctx.engine.logs("ghost", 1, 10).await.unwrap_err();
    assert!(matches!(err, Error::AnalysisNotFound(_)));
}

#[tokio::test]
async fn test_initial_logs_unknown_name_is_empty() {
    let ctx = context().await;
    let page = ctx.engine.initial_logs("ghost", 50).await.unwrap();
    assert!(page.entries.is_empty());
    assert_eq!(page.total_count, 0);
}

#[tokio::test]
async fn test_download_logs_requires_a_log_file() {
    let ctx = context().await;
    create_foo(&ctx).await;

    let err = ctx
        .engine
        .download_logs("foo", TimeRange::All)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LogsNotFound(_)));

    ctx.engine.append_log("foo", "first entry").await.unwrap();
    let content = ctx.engine.download_logs("foo", TimeRange::All).await.unwrap();
    assert!(content.contains("first entry"));
}

// ============================================
// Environment
// ============================================

#[tokio::test]
async fn test_environment_round_trip_and_restart() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    let vars = vec![
        ("API_KEY".to_string(), "k-123".to_string()),
        ("MODE".to_string(), "debug".to_string()),
    ];
    let outcome = ctx
        .engine
        .update_environment("foo", vars.clone())
        .await
        .unwrap();
    assert!(outcome.restarted);
    assert_eq!(ctx.engine.status("foo").await, AnalysisStatus::Running);

    assert_eq!(ctx.engine.environment("foo").await.unwrap(), vars);
}

#[tokio::test]
async fn test_environment_of_fresh_analysis_is_empty() {
    let ctx = context().await;
    create_foo(&ctx).await;
    assert!(ctx.engine.environment("foo").await.unwrap().is_empty());
}

// ============================================
// Configuration document
// ============================================

#[tokio::test]
async fn test_config_round_trip_across_restart() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();
    ctx.engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let before = ctx.engine.config_document().await;

    let reopened = ctx.reopen();
    reopened.initialize().await.unwrap();
    let after = reopened.config_document().await;

    assert_eq!(before, after);
    assert_eq!(after.analyses["foo"].status, AnalysisStatus::Running);
    assert!(after.analyses["foo"].enabled);
}

#[tokio::test]
async fn test_update_config_document_merges_without_discarding_runtime_state() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine
        .create_analysis("gone", "x", AnalysisKind::Listener, None)
        .await
        .unwrap();
    ctx.engine.append_log("foo", "kept entry").await.unwrap();

    let mut doc = ctx.engine.config_document().await;
    doc.analyses.remove("gone");
    doc.analyses.get_mut("foo").unwrap().enabled = true;
    doc.analyses
        .insert("incoming".to_string(), Default::default());

    ctx.engine.update_config_document(doc).await.unwrap();

    let saved = ctx.engine.config_document().await;
    assert!(saved.analyses["foo"].enabled);
    assert!(!saved.analyses.contains_key("gone"));
    assert!(saved.analyses.contains_key("incoming"));

    // foo's live record survived the merge: its log ring is intact
    let page = ctx.engine.initial_logs("foo", 10).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].message, "kept entry");
}

#[tokio::test]
async fn test_start_enabled_restarts_running_and_enabled_entries() {
    let ctx = context().await;
    ctx.engine
        .create_analysis("was-running", "a", AnalysisKind::Listener, None)
        .await
        .unwrap();
    ctx.engine
        .create_analysis("is-enabled", "b", AnalysisKind::Listener, None)
        .await
        .unwrap();
    ctx.engine
        .create_analysis("idle", "c", AnalysisKind::Listener, None)
        .await
        .unwrap();

    ctx.engine
        .run("was-running", AnalysisKind::Listener)
        .await
        .unwrap();
    ctx.engine
        .update_analysis(
            "is-enabled",
            AnalysisUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Fresh engine over the same state, as after a host reboot
    let tmp_runtime = Arc::new(RecordingRuntime::default());
    let reopened = AnalysisEngine::new(
        ctx.settings.clone(),
        tmp_runtime.clone(),
        Arc::new(StaticTeamDirectory::new(["ops"])),
        Arc::new(ChaChaCipher::new([1u8; 32])),
    );
    reopened.initialize().await.unwrap();
    let started = reopened.start_enabled().await.unwrap();

    assert_eq!(started, 2);
    let mut starts = tmp_runtime.starts();
    starts.sort();
    assert_eq!(starts, vec!["is-enabled", "was-running"]);
}

// ============================================
// The concrete scenario
// ============================================

#[tokio::test]
async fn test_upload_edit_update_rollback_scenario() {
    let ctx = context().await;

    // Upload: version 1 stored automatically
    create_foo(&ctx).await;
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.versions.len(), 1);
    assert_eq!(meta.current_version, 1);

    // The live file drifts in place, then an update to "X" arrives:
    // the drifted content is captured as version 2
    let drifted = "module.exports = () => 'drifted';\n";
    let layout = scriptorium_core::StorageLayout::new(ctx.settings.analyses_dir.clone());
    tokio::fs::write(layout.source_path("foo"), drifted)
        .await
        .unwrap();
    let outcome = ctx
        .engine
        .update_analysis(
            "foo",
            AnalysisUpdate {
                content: Some("X".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.saved_version, Some(2));
    assert_eq!(ctx.engine.version_content("foo", 2).await.unwrap(), drifted);
    assert_eq!(ctx.engine.content("foo").await.unwrap(), "X");

    // Live "X" is an unsaved draft until an explicit save
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.current_version, meta.next_version_number);

    // Rollback to version 1: live restored, logs cleared, current = 1
    ctx.engine.append_log("foo", "to be cleared").await.unwrap();
    let outcome = ctx.engine.rollback_to_version("foo", 1).await.unwrap();
    assert_eq!(outcome.version, 1);
    assert_eq!(ctx.engine.content("foo").await.unwrap(), SCRIPT);
    let meta = ctx.engine.versions("foo").await.unwrap();
    assert_eq!(meta.current_version, 1);
    let page = ctx.engine.logs("foo", 1, 50).await.unwrap();
    assert!(page.entries.iter().all(|e| e.message != "to be cleared"));
}

// ============================================
// Events
// ============================================

#[tokio::test]
async fn test_mutations_emit_events() {
    let ctx = context().await;
    let mut rx = ctx.engine.subscribe();

    create_foo(&ctx).await;
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();
    ctx.engine.append_log("foo", "hello").await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }

    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::Created { analysis } if analysis == "foo")));
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::StatusChanged {
            status: AnalysisStatus::Running,
            ..
        }
    )));
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::LogAppended { entry, .. } if entry.message == "hello")));
}

// ============================================
// Listing
// ============================================

#[tokio::test]
async fn test_list_analyses_merges_disk_and_registry() {
    let ctx = context().await;
    create_foo(&ctx).await;
    ctx.engine
        .create_analysis("bar", "0123456789", AnalysisKind::Listener, Some("ops"))
        .await
        .unwrap();
    ctx.engine.run("foo", AnalysisKind::Listener).await.unwrap();

    let summaries = ctx.engine.list_analyses().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "bar");
    assert_eq!(summaries[0].size, "10 B");
    assert_eq!(summaries[0].team_id.as_deref(), Some("ops"));
    assert_eq!(summaries[1].name, "foo");
    assert_eq!(summaries[1].status, AnalysisStatus::Running);
    assert!(summaries[1].last_start_time.is_some());
}
