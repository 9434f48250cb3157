//! End-to-end reconciliation runs against an in-memory archive.
//!
//! Each test seeds a mod list on disk, simulates a vendor patch by editing
//! the archive tables directly, and drives the reconciler and restorer.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqmend_archive::{
    BlockOffset, BlockType, DataCategory, FsIndexBackup, IndexTable, MemoryArchive,
    memory::IndexWrite,
};
use sqmend_reconcile::{
    CancellationToken, DriftClassification, EntryState, IndexIntegrity, IndexOverlay,
    INTERNAL_SOURCE, ModEntry, ModList, ModListStore, ReconcileConfig, ReconcileError,
    Reconciler, StartupOperator, probe_installation,
};
use tempfile::TempDir;

const TOP: &str = "chara/equipment/e0001/texture/v01_c0101e0001_top_d.tex";
const GLOVES: &str = "chara/equipment/e0001/texture/v01_c0101e0001_glv_d.tex";
const BODY: &str = "chara/human/c0101/obj/body/b0001/material/v0001/mt_c0101b0001_a.mtrl";
const SKIN: &str = "chara/human/c0101/obj/body/b0001/texture/--c0101b0001_d.tex";
const META: &str = "chara/equipment/e0001/e0001_top.meta";

type TestReconciler = Reconciler<MemoryArchive, IndexOverlay<MemoryArchive>>;

struct HealthyIndexes;

impl IndexIntegrity for HealthyIndexes {
    async fn check_dat_counts(&self, _category: DataCategory) -> sqmend_reconcile::Result<bool> {
        Ok(false)
    }

    async fn repair_dat_counts(&self, _category: DataCategory) -> sqmend_reconcile::Result<()> {
        Ok(())
    }

    async fn restore_backups(&self, _backup_dir: &Path) -> sqmend_reconcile::Result<bool> {
        Ok(false)
    }
}

struct DeclineRestore;

impl StartupOperator for DeclineRestore {
    fn confirm_restore(&self, _error: &ReconcileError) -> bool {
        false
    }
}

struct Install {
    dir: TempDir,
    archive: Arc<MemoryArchive>,
    reconciler: TestReconciler,
}

impl Install {
    async fn list(&self) -> ModList {
        self.reconciler.store().load().await.expect("load list")
    }

    fn entry_offset(&self, path: &str) -> BlockOffset {
        self.archive.offset_of(path, IndexTable::Primary)
    }

    fn journal_exists(&self) -> bool {
        self.reconciler.config().journal_path().exists()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Chara blocks at 100, 500 and 700 hold textures; the game owns segments
/// 0 to 2.
fn patched_archive() -> MemoryArchive {
    MemoryArchive::new()
        .with_block(DataCategory::Chara, 100u64, BlockType::Texture)
        .with_block(DataCategory::Chara, 500u64, BlockType::Texture)
        .with_block(DataCategory::Chara, 700u64, BlockType::Texture)
        .with_unmodded_segments(
            DataCategory::Chara,
            ["040000.win32.dat0", "040000.win32.dat1", "040000.win32.dat2"],
        )
}

fn user_entry(path: &str) -> ModEntry {
    ModEntry::new(path, DataCategory::Chara, 100u64, 500u64)
        .with_source("Example Modpack")
        .with_enabled(true)
}

async fn install(archive: MemoryArchive, mods: Vec<ModEntry>) -> Install {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("0a0000.win32.dat0"), b"exd").expect("write exd");

    let config = ReconcileConfig::new(dir.path())
        .with_backup_dir(dir.path().join("Index_Backups"))
        .with_classify_concurrency(4);
    ModListStore::new(config.mod_list_path.clone())
        .save(&ModList::new(mods))
        .await
        .expect("seed list");

    let (_report, token) = probe_installation(&config, &HealthyIndexes, &DeclineRestore)
        .await
        .into_result()
        .expect("probe");

    let archive = Arc::new(archive);
    let overlay = IndexOverlay::new(Arc::clone(&archive));
    let reconciler = Reconciler::new(&token, config, Arc::clone(&archive), overlay);
    Install {
        dir,
        archive,
        reconciler,
    }
}

#[tokio::test]
async fn unchanged_entry_stays_enabled() {
    let setup = install(
        patched_archive().with_offsets(TOP, 500u64, 500u64),
        vec![user_entry(TOP)],
    )
    .await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.processed, 1);
    assert!(report.repaired.is_empty());
    assert!(report.purged.is_empty());
    assert_eq!(report.outcomes[0].classification, DriftClassification::Unchanged);
    assert_eq!(report.outcomes[0].to, EntryState::Active);
    assert!(setup.list().await.get(TOP).expect("entry").enabled);
    assert!(setup.archive.journal().is_empty());
}

#[tokio::test]
async fn moved_baseline_disables_and_records_new_original() {
    let setup = install(
        patched_archive().with_offsets(TOP, 700u64, 700u64),
        vec![user_entry(TOP)],
    )
    .await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.repaired, vec![TOP.to_string()]);
    assert_eq!(report.outcomes[0].from, EntryState::Active);
    assert_eq!(report.outcomes[0].to, EntryState::DisabledDrifted);

    let list = setup.list().await;
    let entry = list.get(TOP).expect("entry");
    assert!(!entry.enabled);
    assert_eq!(entry.data.original_offset, BlockOffset::new(700));
}

#[tokio::test]
async fn second_run_without_changes_is_unchanged() {
    let setup = install(
        patched_archive().with_offsets(TOP, 700u64, 700u64),
        vec![user_entry(TOP)],
    )
    .await;

    setup.reconciler.run_reconciliation().await.expect("first run");
    let report = setup.reconciler.run_reconciliation().await.expect("second run");

    assert!(report.repaired.is_empty());
    assert_eq!(report.outcomes[0].classification, DriftClassification::Unchanged);
    assert_eq!(report.outcomes[0].from, EntryState::Disabled);
    assert_eq!(report.outcomes[0].to, EntryState::Disabled);
}

#[tokio::test]
async fn disagreeing_indexes_settle_after_one_run() {
    let setup = install(
        patched_archive().with_offsets(TOP, 500u64, 700u64),
        vec![user_entry(TOP)],
    )
    .await;

    let report = setup.reconciler.run_reconciliation().await.expect("first run");
    assert_eq!(
        report.outcomes[0].classification,
        DriftClassification::IndexesDisagree
    );

    let report = setup.reconciler.run_reconciliation().await.expect("second run");
    assert_eq!(report.outcomes[0].classification, DriftClassification::Unchanged);
    assert_eq!(setup.entry_offset(TOP), BlockOffset::new(700));
}

#[tokio::test]
async fn rolled_over_segment_is_purged() {
    let overlay = BlockOffset::from_parts(3, 0x2000).expect("offset");
    let archive = patched_archive()
        .with_block(DataCategory::Chara, overlay, BlockType::Texture)
        .with_offsets(TOP, overlay, overlay)
        .with_unmodded_segments(
            DataCategory::Chara,
            [
                "040000.win32.dat0",
                "040000.win32.dat1",
                "040000.win32.dat2",
                "040000.win32.dat3",
            ],
        );
    let entry = ModEntry::new(TOP, DataCategory::Chara, 100u64, overlay).with_enabled(true);
    let setup = install(archive, vec![entry]).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.purged, vec![TOP.to_string()]);
    assert_eq!(
        report.outcomes[0].classification,
        DriftClassification::SegmentRolledOver
    );
    assert!(setup.list().await.is_empty());
    assert_ne!(setup.entry_offset(TOP), overlay);
    assert_eq!(setup.entry_offset(TOP), BlockOffset::new(100));
}

#[tokio::test]
async fn purging_enabled_entry_unmaps_overlay_block() {
    let archive = patched_archive()
        .with_block(DataCategory::Chara, 900u64, BlockType::Empty)
        .with_offsets(TOP, 900u64, 900u64);
    let entry = ModEntry::new(TOP, DataCategory::Chara, 100u64, 900u64).with_enabled(true);
    let setup = install(archive, vec![entry]).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.purged, vec![TOP.to_string()]);
    assert_eq!(report.outcomes[0].classification, DriftClassification::TypeMismatch);
    assert_eq!(report.outcomes[0].to, EntryState::Purged);
    assert_ne!(setup.entry_offset(TOP), BlockOffset::new(900));
    assert_ne!(
        setup.archive.offset_of(TOP, IndexTable::Secondary),
        BlockOffset::new(900)
    );
}

#[tokio::test]
async fn internal_purge_rebuilds_internals_before_reenabling() {
    let archive = patched_archive()
        .with_block(DataCategory::Chara, 900u64, BlockType::Empty)
        .with_offsets(BODY, 900u64, 900u64)
        .with_offsets(SKIN, 500u64, 500u64)
        .with_offsets(META, 500u64, 500u64)
        .with_offsets(TOP, 700u64, 700u64);
    let mods = vec![
        ModEntry::new(BODY, DataCategory::Chara, 100u64, 900u64)
            .with_source(INTERNAL_SOURCE)
            .with_enabled(true),
        ModEntry::new(SKIN, DataCategory::Chara, 100u64, 500u64)
            .with_source(INTERNAL_SOURCE)
            .with_enabled(true),
        user_entry(META),
        user_entry(TOP),
    ];
    let setup = install(archive, mods).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");
    assert!(report.internal_files_modified);
    assert_eq!(report.purged, vec![BODY.to_string()]);

    let before_restore = setup.archive.journal().len();
    let outcome = setup
        .reconciler
        .apply_restore_previous(&CancellationToken::new())
        .await
        .expect("restore");
    assert!(outcome.is_complete());

    let journal = setup.archive.journal();
    let writes = &journal[before_restore..];
    let first_reenable = writes
        .iter()
        .position(|w| matches!(w, IndexWrite::Set { path, .. } if path == TOP))
        .expect("top re-enabled");
    let last_reset = writes
        .iter()
        .rposition(|w| match w {
            IndexWrite::Set { path, .. } => path == SKIN,
            IndexWrite::Delete { path } => path == META,
        })
        .expect("internals reset");
    assert!(last_reset < first_reenable);

    let list = setup.list().await;
    assert!(list.mods.iter().all(|m| !m.is_internal()));
    assert!(list.get(TOP).expect("top").enabled);
    assert!(list.get(META).expect("meta").enabled);
    assert_eq!(setup.entry_offset(TOP), BlockOffset::new(500));
    assert_eq!(setup.entry_offset(SKIN), BlockOffset::new(100));
    assert!(!setup.journal_exists());
}

#[tokio::test]
async fn restore_previous_reenables_only_surviving_entries() {
    let archive = patched_archive()
        .with_block(DataCategory::Chara, 900u64, BlockType::Empty)
        .with_offsets(TOP, 700u64, 700u64)
        .with_offsets(GLOVES, 900u64, 900u64);
    let gloves = ModEntry::new(GLOVES, DataCategory::Chara, 100u64, 900u64).with_enabled(true);
    let setup = install(archive, vec![user_entry(TOP), gloves]).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");
    assert!(!report.internal_files_modified);

    let outcome = setup
        .reconciler
        .apply_restore_previous(&CancellationToken::new())
        .await
        .expect("restore");

    assert_eq!(outcome.processed, 1);
    let list = setup.list().await;
    assert_eq!(list.len(), 1);
    assert!(list.get(TOP).expect("top").enabled);
    assert_eq!(setup.entry_offset(GLOVES), BlockOffset::new(100));
}

#[tokio::test]
async fn clean_and_backup_disables_everything() {
    let archive = patched_archive()
        .with_offsets(TOP, 500u64, 500u64)
        .with_offsets(GLOVES, 500u64, 500u64);
    let setup = install(archive, vec![user_entry(TOP), user_entry(GLOVES)]).await;
    setup.reconciler.run_reconciliation().await.expect("run");

    let dest = setup.dir.path().join("Index_Backups");
    let outcome = setup
        .reconciler
        .apply_clean_and_backup(&dest, &CancellationToken::new())
        .await
        .expect("clean");

    assert_eq!(outcome.processed, 2);
    assert_eq!(setup.archive.backups(), vec![dest]);
    assert!(setup.list().await.enabled_paths().is_empty());
    assert_eq!(setup.entry_offset(TOP), BlockOffset::new(100));
    assert!(!setup.journal_exists());
}

#[tokio::test]
async fn clean_and_backup_with_unusable_destination_changes_nothing() {
    let setup = install(
        patched_archive().with_offsets(TOP, 500u64, 500u64),
        vec![user_entry(TOP)],
    )
    .await;
    let list_path = setup.reconciler.config().mod_list_path.clone();
    let before = std::fs::read(&list_path).expect("read list");

    let dest = setup.dir.path().join("blocked");
    std::fs::write(&dest, b"a file, not a directory").expect("write blocker");

    let result = setup
        .reconciler
        .apply_clean_and_backup(&dest, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ReconcileError::BackupDirectory { .. })));
    assert_eq!(std::fs::read(&list_path).expect("read list"), before);
    assert!(setup.archive.journal().is_empty());
    assert!(setup.archive.backups().is_empty());
}

#[tokio::test]
async fn clean_and_backup_reports_partial_failure() {
    let archive = patched_archive()
        .with_offsets(TOP, 500u64, 500u64)
        .with_offsets(GLOVES, 500u64, 500u64);
    let setup = install(archive, vec![user_entry(TOP), user_entry(GLOVES)]).await;
    setup.archive.poison_path(GLOVES);

    let dest = setup.dir.path().join("Index_Backups");
    let result = setup
        .reconciler
        .apply_clean_and_backup(&dest, &CancellationToken::new())
        .await;

    match result {
        Err(ReconcileError::BatchPartialFailure { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, GLOVES);
            assert_eq!(failures[0].category, DataCategory::Chara);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    let list = setup.list().await;
    assert!(!list.get(TOP).expect("top").enabled);
    assert!(list.get(GLOVES).expect("gloves").enabled);
    assert!(setup.archive.backups().is_empty());
}

#[tokio::test]
async fn cancelled_batch_reports_boundary() {
    let setup = install(
        patched_archive().with_offsets(TOP, 500u64, 500u64),
        vec![user_entry(TOP)],
    )
    .await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let dest = setup.dir.path().join("Index_Backups");
    let outcome = setup
        .reconciler
        .apply_clean_and_backup(&dest, &cancel)
        .await
        .expect("cancelled batch");

    assert_eq!(outcome.cancelled_at, Some(0));
    assert_eq!(outcome.processed, 0);
    assert!(setup.archive.backups().is_empty());
    assert!(setup.list().await.get(TOP).expect("top").enabled);
}

#[tokio::test]
async fn interrupted_run_keeps_pre_patch_enabled_set() {
    let setup = install(
        patched_archive().with_offsets(TOP, 700u64, 700u64),
        vec![user_entry(TOP)],
    )
    .await;

    setup.reconciler.run_reconciliation().await.expect("first run");
    assert!(setup.journal_exists());
    assert!(setup.list().await.enabled_paths().is_empty());

    // The host restarts before the operator picks a restore mode.
    setup.reconciler.run_reconciliation().await.expect("resumed run");
    setup
        .reconciler
        .apply_restore_previous(&CancellationToken::new())
        .await
        .expect("restore");

    assert!(setup.list().await.get(TOP).expect("top").enabled);
    assert_eq!(setup.entry_offset(TOP), BlockOffset::new(500));
}

#[tokio::test]
async fn irrecoverable_entry_only_affects_itself() {
    // Both the overlay block at 600 and the original at 300 were overwritten.
    let archive = patched_archive()
        .with_block(DataCategory::Chara, 300u64, BlockType::Empty)
        .with_block(DataCategory::Chara, 600u64, BlockType::Empty)
        .with_offsets(GLOVES, 600u64, 600u64)
        .with_offsets(TOP, 700u64, 700u64);
    let broken = ModEntry::new(GLOVES, DataCategory::Chara, 300u64, 600u64).with_enabled(true);
    let setup = install(archive, vec![broken.clone(), user_entry(TOP)]).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, GLOVES);
    assert!(matches!(
        report.failures[0].error,
        ReconcileError::IrrecoverableOffset { .. }
    ));
    assert_eq!(report.repaired, vec![TOP.to_string()]);

    let list = setup.list().await;
    assert_eq!(list.get(GLOVES), Some(&broken));
    assert!(report.purged.is_empty());
}

#[tokio::test]
async fn path_dropped_by_patch_disables_entry() {
    // The patch removed GLOVES from both tables; its original block is gone
    // but the overlay block still holds a texture.
    let stale = ModEntry::new(GLOVES, DataCategory::Chara, 300u64, 500u64).with_enabled(true);
    let setup = install(patched_archive(), vec![stale]).await;

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert!(report.is_clean());
    assert!(report.purged.is_empty());
    assert_eq!(report.outcomes[0].classification, DriftClassification::Unchanged);
    assert_eq!(report.outcomes[0].to, EntryState::Disabled);
    assert!(!setup.list().await.get(GLOVES).expect("gloves").enabled);
    assert!(setup.entry_offset(GLOVES).is_null());
}

#[tokio::test]
async fn archive_read_failure_is_retryable() {
    let archive = patched_archive()
        .with_offsets(GLOVES, 500u64, 500u64)
        .with_offsets(TOP, 500u64, 500u64);
    let setup = install(archive, vec![user_entry(GLOVES), user_entry(TOP)]).await;
    setup.archive.poison_path(GLOVES);

    let report = setup.reconciler.run_reconciliation().await.expect("run");

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.is_retryable());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].path, TOP);
}

#[tokio::test]
async fn clean_and_backup_copies_index_files() {
    let setup = install(
        patched_archive().with_offsets(TOP, 500u64, 500u64),
        vec![user_entry(TOP)],
    )
    .await;
    let root = setup.dir.path();
    std::fs::write(root.join("040000.win32.index"), b"index").expect("write index");
    std::fs::write(root.join("040000.win32.index2"), b"index2").expect("write index2");

    let transport = FsIndexBackup::new(root, vec![DataCategory::Chara]);
    let dest = root.join("Index_Backups");
    setup
        .reconciler
        .apply_clean_and_backup_with(&dest, &transport, &CancellationToken::new())
        .await
        .expect("clean");

    assert_eq!(
        std::fs::read(dest.join("040000.win32.index")).expect("backup"),
        b"index"
    );
    assert!(dest.join("040000.win32.index2").exists());
}
