//! Owned, serializable copies of table state.

use serde::{Deserialize, Serialize};

use crate::site::SiteId;
use crate::table::{FLAG_FAILED, FLAG_SUCCEEDED};

/// Coverage status of one call site, derived from its two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Observed but never failed. Only reachable through a direct table write;
    /// the policy fails a site on its first observation.
    Untested,
    /// Failed once; the program never came back to this site afterwards.
    FailedOnce,
    /// Failed once and later reached again successfully.
    Recovered,
}

/// One call site and its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteRecord {
    pub site: SiteId,
    pub has_failed: bool,
    pub has_succeeded: bool,
}

impl CallSiteRecord {
    #[must_use]
    pub fn from_flags(site: SiteId, flags: u32) -> Self {
        Self {
            site,
            has_failed: flags & FLAG_FAILED != 0,
            has_succeeded: flags & FLAG_SUCCEEDED != 0,
        }
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.has_failed {
            flags |= FLAG_FAILED;
        }
        if self.has_succeeded {
            flags |= FLAG_SUCCEEDED;
        }
        flags
    }

    #[must_use]
    pub fn status(&self) -> SiteStatus {
        match (self.has_failed, self.has_succeeded) {
            (true, true) => SiteStatus::Recovered,
            (true, false) => SiteStatus::FailedOnce,
            (false, _) => SiteStatus::Untested,
        }
    }

    /// Both failure handling and post-failure success were exercised.
    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.has_failed && self.has_succeeded
    }
}

/// Ordered copy of every record in a table at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub capacity: usize,
    pub records: Vec<CallSiteRecord>,
}

impl TableSnapshot {
    #[must_use]
    pub fn new(capacity: usize, records: Vec<CallSiteRecord>) -> Self {
        Self { capacity, records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every discovered site both failed and later succeeded. Vacuously true
    /// for an empty table.
    #[must_use]
    pub fn is_fully_covered(&self) -> bool {
        self.records.iter().all(CallSiteRecord::is_covered)
    }

    #[must_use]
    pub fn count(&self, status: SiteStatus) -> usize {
        self.records.iter().filter(|r| r.status() == status).count()
    }

    /// Sites whose failure was injected but which never demonstrated recovery.
    pub fn unrecovered(&self) -> impl Iterator<Item = &CallSiteRecord> {
        self.records.iter().filter(|r| !r.is_covered())
    }

    /// BLAKE3 digest over the record count and each ordered `(site, flags)` entry.
    #[must_use]
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.records.len() as u64).to_le_bytes());
        for record in &self.records {
            hasher.update(&record.site.module.to_le_bytes());
            hasher.update(&record.site.offset.to_le_bytes());
            hasher.update(&record.flags().to_le_bytes());
        }
        hasher.finalize()
    }

    /// Hex form of [`Self::digest`].
    #[must_use]
    pub fn digest_hex(&self) -> String {
        self.digest().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str, failed: bool, succeeded: bool) -> CallSiteRecord {
        CallSiteRecord {
            site: SiteId::tagged(tag),
            has_failed: failed,
            has_succeeded: succeeded,
        }
    }

    #[test]
    fn status_follows_flags() {
        assert_eq!(record("a", false, false).status(), SiteStatus::Untested);
        assert_eq!(record("a", true, false).status(), SiteStatus::FailedOnce);
        assert_eq!(record("a", true, true).status(), SiteStatus::Recovered);
    }

    #[test]
    fn flags_round_trip_through_bits() {
        let r = record("a", true, true);
        assert_eq!(CallSiteRecord::from_flags(r.site, r.flags()), r);
    }

    #[test]
    fn empty_snapshot_is_fully_covered() {
        assert!(TableSnapshot::default().is_fully_covered());
    }

    #[test]
    fn partial_snapshot_lists_unrecovered_sites() {
        let snap = TableSnapshot::new(
            4,
            vec![record("a", true, true), record("b", true, false)],
        );
        assert!(!snap.is_fully_covered());
        let unrecovered: Vec<_> = snap.unrecovered().map(|r| r.site).collect();
        assert_eq!(unrecovered, vec![SiteId::tagged("b")]);
        assert_eq!(snap.count(SiteStatus::Recovered), 1);
        assert_eq!(snap.count(SiteStatus::FailedOnce), 1);
    }

    #[test]
    fn digest_depends_on_order_and_flags() {
        let ab = TableSnapshot::new(4, vec![record("a", true, false), record("b", true, false)]);
        let ba = TableSnapshot::new(4, vec![record("b", true, false), record("a", true, false)]);
        let ab_done = TableSnapshot::new(4, vec![record("a", true, true), record("b", true, false)]);
        assert_ne!(ab.digest(), ba.digest());
        assert_ne!(ab.digest(), ab_done.digest());
        assert_eq!(ab.digest(), ab.clone().digest());
        assert_eq!(ab.digest_hex().len(), 64);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = TableSnapshot::new(2, vec![record("a", true, false)]);
        let json = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(json["capacity"], 2);
        assert_eq!(json["records"][0]["has_failed"], true);
        assert_eq!(json["records"][0]["has_succeeded"], false);
    }
}
