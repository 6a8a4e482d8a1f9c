//! Integration tests across the resolver, victim queue, and backing store.

use crate::backing_store::BackingStore;
use crate::error::MmError;
use crate::frame::PageId;
use crate::test_fixtures::{assert_consistent, manager};

#[test]
fn first_touch_claims_a_free_frame() {
    let (mgr, _file) = manager(128, 64, "first-touch");
    mgr.register_process(1, 128);

    mgr.resolve(1, 0).unwrap();

    assert_eq!(mgr.page_ins(), 1);
    assert_eq!(mgr.page_outs(), 0);
    assert_eq!(mgr.used_frames(), 1);
    assert_eq!(mgr.resident_pages(1), 1);
    assert_eq!(mgr.victim_queue_snapshot(), vec![PageId::new(1, 0)]);
    assert_consistent(&mgr, &[1]);
}

#[test]
fn resolving_a_resident_page_changes_nothing() {
    let (mgr, _file) = manager(128, 64, "idempotent");
    mgr.register_process(1, 128);

    mgr.resolve(1, 0).unwrap();
    mgr.resolve(1, 0).unwrap();
    mgr.resolve(1, 0).unwrap();

    assert_eq!(mgr.page_ins(), 1);
    assert_eq!(mgr.victim_queue_snapshot().len(), 1);
    assert_consistent(&mgr, &[1]);
}

#[test]
fn eviction_follows_load_order() {
    // One frame: every new page evicts the previous one.
    let (mgr, _file) = manager(64, 64, "fifo");
    mgr.register_process(1, 256);

    mgr.resolve(1, 0).unwrap();
    mgr.resolve(1, 1).unwrap();
    assert_eq!(mgr.page_outs(), 1);
    assert!(mgr
        .backing_snapshot()
        .iter()
        .any(|(id, _)| *id == PageId::new(1, 0)));

    mgr.resolve(1, 2).unwrap();
    assert_eq!(mgr.page_outs(), 2);
    assert_eq!(mgr.resident_pages(1), 1);
    assert_consistent(&mgr, &[1]);
}

#[test]
fn reloaded_page_requeues_at_the_tail() {
    let (mgr, _file) = manager(128, 64, "requeue");
    mgr.register_process(1, 256);

    mgr.resolve(1, 0).unwrap();
    mgr.resolve(1, 1).unwrap();
    // Evicts page 0, the oldest.
    mgr.resolve(1, 2).unwrap();
    // Reload page 0; it evicts page 1 and joins the tail behind page 2.
    mgr.resolve(1, 0).unwrap();
    assert_eq!(
        mgr.victim_queue_snapshot(),
        vec![PageId::new(1, 2), PageId::new(1, 0)]
    );

    // Next eviction must take page 2, not the freshly reloaded page 0.
    mgr.resolve(1, 3).unwrap();
    assert!(mgr
        .backing_snapshot()
        .iter()
        .any(|(id, _)| *id == PageId::new(1, 2)));
    assert_consistent(&mgr, &[1]);
}

#[test]
fn two_processes_under_pressure_stay_consistent() {
    // Two frames, two processes touching three pages each in order.
    let (mgr, file) = manager(128, 64, "pressure");
    mgr.register_process(1, 256);
    mgr.register_process(2, 256);

    for page in 0..3 {
        mgr.resolve(1, page).unwrap();
        assert_consistent(&mgr, &[1, 2]);
        mgr.resolve(2, page).unwrap();
        assert_consistent(&mgr, &[1, 2]);
    }

    assert!(mgr.page_outs() >= 2);
    assert!(!mgr.backing_snapshot().is_empty());
    let reloaded = BackingStore::reload(&file.path).unwrap();
    assert_eq!(reloaded.len(), mgr.backing_snapshot().len());
}

#[test]
fn frame_data_survives_eviction_and_reload() {
    let (mgr, _file) = manager(64, 64, "spill-data");
    mgr.register_process(1, 256);

    mgr.write_token(1, 0, "(0x40 7)").unwrap();
    mgr.write_token(1, 0, "(0x41 8)").unwrap();
    // Force page 0 out and back in.
    mgr.resolve(1, 1).unwrap();
    mgr.resolve(1, 0).unwrap();

    let frames = mgr.frames_snapshot();
    let frame = frames
        .iter()
        .find(|f| f.owner == Some(PageId::new(1, 0)))
        .expect("page 0 resident after reload");
    assert_eq!(frame.data, "(0x40 7)(0x41 8)");
    // The reloaded page's spill entry is gone.
    assert!(!mgr
        .backing_snapshot()
        .iter()
        .any(|(id, _)| *id == PageId::new(1, 0)));
}

#[test]
fn spill_file_mirrors_the_map() {
    let (mgr, file) = manager(64, 64, "spill-file");
    mgr.register_process(1, 256);

    mgr.write_token(1, 0, "(0x40 1)").unwrap();
    mgr.write_token(1, 1, "(0x80 2)").unwrap();
    mgr.write_token(1, 2, "(0xC0 3)").unwrap();

    let reloaded = BackingStore::reload(&file.path).unwrap();
    let snapshot = mgr.backing_snapshot();
    assert_eq!(reloaded.len(), snapshot.len());
    for (id, data) in snapshot {
        assert_eq!(reloaded.get(&id), Some(&data), "mismatch for {id}");
    }
}

#[test]
fn resolve_rejects_bad_targets() {
    let (mgr, _file) = manager(128, 64, "errors");
    mgr.register_process(1, 128);

    assert_eq!(mgr.resolve(9, 0), Err(MmError::UnknownProcess(9)));
    assert_eq!(
        mgr.resolve(1, 2),
        Err(MmError::PageOutOfRange {
            pid: 1,
            page: 2,
            pages: 2
        })
    );
    // Failed resolves leave no trace.
    assert_eq!(mgr.page_ins(), 0);
    assert!(mgr.victim_queue_snapshot().is_empty());
}

#[test]
fn address_translation_is_clamped() {
    let (mgr, _file) = manager(128, 64, "translate");
    mgr.register_process(1, 256);

    assert_eq!(mgr.page_for_addr(1, 0).unwrap(), 0);
    assert_eq!(mgr.page_for_addr(1, 63).unwrap(), 0);
    assert_eq!(mgr.page_for_addr(1, 64).unwrap(), 1);
    assert_eq!(mgr.page_for_addr(1, 255).unwrap(), 3);
    assert_eq!(mgr.page_for_addr(1, 10_000).unwrap(), 3);
}
