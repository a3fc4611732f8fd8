//! Campaign convergence.
//!
//! After each run the driver hands the table snapshot to a
//! [`ConvergenceDetector`], which stops the campaign on full coverage or when a
//! run left the table exactly as the previous one did (no discoverable progress).

use crate::snapshot::TableSnapshot;

/// Outcome of evaluating one post-run snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Progress is still possible; spawn another run.
    Continue,
    /// Every discovered site has both failed and later succeeded.
    FullCoverage,
    /// The table did not change across two consecutive runs.
    Plateau,
}

impl Verdict {
    #[must_use]
    pub const fn is_converged(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Remembers the previous run's table state.
///
/// Plateau detection compares whole snapshots rather than a checksum, so two
/// different tables can never be mistaken for one another.
#[derive(Debug, Default)]
pub struct ConvergenceDetector {
    previous: Option<TableSnapshot>,
}

impl ConvergenceDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the campaign is finished after a run produced `snapshot`.
    pub fn evaluate(&mut self, snapshot: &TableSnapshot) -> Verdict {
        let verdict = if snapshot.is_fully_covered() {
            Verdict::FullCoverage
        } else if self
            .previous
            .as_ref()
            .is_some_and(|prev| prev.records == snapshot.records)
        {
            Verdict::Plateau
        } else {
            Verdict::Continue
        };
        self.previous = Some(snapshot.clone());
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteId;
    use crate::snapshot::CallSiteRecord;

    fn snap(records: &[(&str, bool, bool)]) -> TableSnapshot {
        TableSnapshot::new(
            16,
            records
                .iter()
                .map(|&(tag, f, s)| CallSiteRecord {
                    site: SiteId::tagged(tag),
                    has_failed: f,
                    has_succeeded: s,
                })
                .collect(),
        )
    }

    #[test]
    fn full_coverage_converges_immediately() {
        let mut det = ConvergenceDetector::new();
        assert_eq!(det.evaluate(&snap(&[("a", true, true)])), Verdict::FullCoverage);
    }

    #[test]
    fn empty_table_counts_as_full_coverage() {
        let mut det = ConvergenceDetector::new();
        assert_eq!(det.evaluate(&snap(&[])), Verdict::FullCoverage);
    }

    #[test]
    fn first_partial_run_continues() {
        let mut det = ConvergenceDetector::new();
        assert_eq!(det.evaluate(&snap(&[("a", true, false)])), Verdict::Continue);
    }

    #[test]
    fn identical_consecutive_snapshots_plateau() {
        let mut det = ConvergenceDetector::new();
        let stuck = snap(&[("a", true, true), ("b", true, false)]);
        assert_eq!(det.evaluate(&stuck), Verdict::Continue);
        assert_eq!(det.evaluate(&stuck), Verdict::Plateau);
    }

    #[test]
    fn new_site_is_progress() {
        let mut det = ConvergenceDetector::new();
        assert_eq!(det.evaluate(&snap(&[("a", true, false)])), Verdict::Continue);
        assert_eq!(
            det.evaluate(&snap(&[("a", true, false), ("b", true, false)])),
            Verdict::Continue
        );
    }

    #[test]
    fn flag_change_is_progress() {
        let mut det = ConvergenceDetector::new();
        assert_eq!(
            det.evaluate(&snap(&[("a", true, false), ("b", true, false)])),
            Verdict::Continue
        );
        assert_eq!(
            det.evaluate(&snap(&[("a", true, true), ("b", true, false)])),
            Verdict::Continue
        );
    }

    #[test]
    fn same_count_different_sites_is_not_a_plateau() {
        let mut det = ConvergenceDetector::new();
        det.evaluate(&snap(&[("a", true, false)]));
        assert_eq!(det.evaluate(&snap(&[("b", true, false)])), Verdict::Continue);
    }
}
