//! The fail-once decision policy.
//!
//! Every intercepted allocation asks [`decide`] what to do. The first
//! observation of a site anywhere in the campaign fails; every later one
//! delegates to the real allocator.

use crate::error::TableError;
use crate::site::SiteId;
use crate::table::CoverageTable;

/// What an intercepted allocation call must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Return the primitive's failure sentinel without touching the real allocator.
    Fail,
    /// Call the real allocator and return its result unmodified.
    Delegate,
}

/// Apply the policy for one call at `site`, updating the table.
///
/// `has_failed` is set with an atomic fetch-or, so when several threads reach a
/// new site together exactly one of them gets [`Decision::Fail`].
pub fn decide(table: &CoverageTable<'_>, site: SiteId) -> Result<Decision, TableError> {
    let record = table.lookup_or_create(site)?;
    if record.claim_failure() {
        Ok(Decision::Fail)
    } else {
        record.mark_succeeded();
        Ok(Decision::Delegate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SharedRegion;

    #[test]
    fn first_call_fails_then_delegates() {
        let region = SharedRegion::anonymous(4).expect("map");
        let table = region.table();
        let site = SiteId::tagged("alloc");

        assert_eq!(decide(&table, site).expect("decide"), Decision::Fail);
        let snap = table.snapshot();
        assert!(snap.records[0].has_failed);
        assert!(!snap.records[0].has_succeeded);

        for _ in 0..3 {
            assert_eq!(decide(&table, site).expect("decide"), Decision::Delegate);
        }
        assert!(table.snapshot().records[0].has_succeeded);
    }

    #[test]
    fn sites_fail_independently() {
        let region = SharedRegion::anonymous(4).expect("map");
        let table = region.table();
        assert_eq!(decide(&table, SiteId::tagged("a")).expect("a"), Decision::Fail);
        assert_eq!(decide(&table, SiteId::tagged("b")).expect("b"), Decision::Fail);
        assert_eq!(decide(&table, SiteId::tagged("a")).expect("a"), Decision::Delegate);
    }

    #[test]
    fn decision_survives_reattach() {
        let region = SharedRegion::anonymous(4).expect("map");
        assert_eq!(
            decide(&region.table(), SiteId::tagged("x")).expect("x"),
            Decision::Fail
        );
        // A fresh handle on the same region stands in for the next run.
        let next_run = region.table();
        assert_eq!(
            decide(&next_run, SiteId::tagged("x")).expect("x"),
            Decision::Delegate
        );
    }

    #[test]
    fn capacity_error_propagates() {
        let region = SharedRegion::anonymous(1).expect("map");
        let table = region.table();
        decide(&table, SiteId::tagged("a")).expect("a");
        let err = decide(&table, SiteId::tagged("b")).expect_err("full");
        assert!(matches!(err, TableError::CapacityExceeded { capacity: 1 }));
    }

    #[test]
    fn racing_threads_fail_a_new_site_once() {
        let region = SharedRegion::anonymous(4).expect("map");
        let table = region.table();
        let fails = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if decide(&table, SiteId::tagged("hot")).expect("decide")
                            == Decision::Fail
                        {
                            fails.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        assert_eq!(fails.into_inner(), 1);
        assert_eq!(table.len(), 1);
    }
}
