//! Integration test: the coverage table is shared across processes.
//!
//! Validates:
//! 1. Records created in forked children are visible to the parent.
//! 2. Knowledge accumulates across sequential "runs" (exactly-once failure).
//! 3. Two independent mappings of one table file observe each other's writes.
//!
//! Run: cargo test -p failonce-core --test table_sharing_test

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use failonce_core::{Decision, SharedRegion, SiteId, decide};

fn unique_tmp_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}.bin", std::process::id()))
}

/// Run `body` in a forked child and return its exit code.
fn in_child(body: impl FnOnce() -> i32) -> i32 {
    // SAFETY: the child only touches the shared mapping and exits with `_exit`.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let code = body();
        unsafe { libc::_exit(code) };
    }
    let mut status = 0;
    // SAFETY: waiting on our own child.
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid);
    assert!(libc::WIFEXITED(status), "child did not exit normally");
    libc::WEXITSTATUS(status)
}

#[test]
fn forked_runs_accumulate_in_one_table() {
    let region = SharedRegion::anonymous(16).expect("map table");
    let sites = [SiteId::tagged("open"), SiteId::tagged("read"), SiteId::tagged("parse")];

    // Each "run" walks the same program path; the first unfailed site fails and
    // the program gives up, exactly like a target that exits on NULL.
    let mut failures_per_run = Vec::new();
    for _ in 0..4 {
        let table = region.table();
        let failed_at = in_child(|| {
            for (i, site) in sites.iter().enumerate() {
                match decide(&table, *site) {
                    Ok(Decision::Fail) => return i as i32 + 1,
                    Ok(Decision::Delegate) => {}
                    Err(_) => return 100,
                }
            }
            0
        });
        failures_per_run.push(failed_at);
    }

    assert_eq!(failures_per_run, vec![1, 2, 3, 0]);
    let snap = region.table().snapshot();
    assert_eq!(snap.len(), 3);
    assert!(snap.is_fully_covered());
}

#[test]
fn capacity_overflow_in_child_is_visible_to_parent() {
    let region = SharedRegion::anonymous(2).expect("map table");
    let table = region.table();
    let code = in_child(|| {
        for tag in ["a", "b", "c"] {
            if decide(&table, SiteId::tagged(tag)).is_err() {
                return 1;
            }
        }
        0
    });
    assert_eq!(code, 1);
    assert!(region.table().capacity_exceeded());
    assert_eq!(region.table().len(), 2);
}

#[test]
fn separate_file_mappings_share_state() {
    let path = unique_tmp_path("failonce-sharing");
    let driver = SharedRegion::create(&path, 32).expect("create table file");
    let run = SharedRegion::open(&path).expect("open table file");

    run.table().note_attach();
    assert_eq!(
        decide(&run.table(), SiteId::tagged("x")).expect("decide"),
        Decision::Fail
    );

    let seen = driver.table();
    assert_eq!(seen.attach_count(), 1);
    let snap = seen.snapshot();
    assert_eq!(snap.len(), 1);
    assert!(snap.records[0].has_failed);
    assert!(!snap.records[0].has_succeeded);

    drop(run);
    drop(driver);
    std::fs::remove_file(&path).expect("remove table file");
}

#[test]
fn flags_are_monotonic_across_runs() {
    let region = SharedRegion::anonymous(8).expect("map table");
    let site = SiteId::tagged("mono");
    let mut history = Vec::new();
    for _ in 0..5 {
        let _ = decide(&region.table(), site).expect("decide");
        let rec = region.table().snapshot().records[0];
        history.push((rec.has_failed, rec.has_succeeded));
    }
    for pair in history.windows(2) {
        assert!(pair[1].0 >= pair[0].0);
        assert!(pair[1].1 >= pair[0].1);
    }
    assert_eq!(history[0], (true, false));
    assert_eq!(history[4], (true, true));
}
