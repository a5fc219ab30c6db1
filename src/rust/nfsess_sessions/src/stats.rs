use crate::Verdict;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-file counters, updated from the worker pool.
#[derive(Default, Debug)]
pub struct FileStats {
    pub lines: AtomicU64,
    pub malformed: AtomicU64,
    pub not_uplink: AtomicU64,
    pub unattributed: AtomicU64,
    pub local_as: AtomicU64,
    pub half_flows: AtomicU64,
}

impl FileStats {
    pub(crate) fn record(&self, verdict: &Verdict) {
        let counter = match verdict {
            Verdict::Keep(_) => &self.half_flows,
            Verdict::NotUplink => &self.not_uplink,
            Verdict::Unattributed => &self.unattributed,
            Verdict::LocalAs => &self.local_as,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What happened to one input file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSummary {
    /// Lines read, including malformed and blank ones.
    pub lines: u64,
    pub malformed: u64,
    pub not_uplink: u64,
    pub unattributed: u64,
    pub local_as: u64,
    pub half_flows: u64,
    /// Distinct sessions after merging.
    pub sessions: u64,
    /// Sessions dropped for being seen in one direction only.
    pub incomplete: u64,
    /// Rows written to the report, excluding the header.
    pub rows: u64,
    pub attribution_conflicts: u64,
    /// Merges whose byte sum was clamped at `u64::MAX`.
    pub saturated_merges: u64,
    pub elapsed_ms: u64,
}

impl From<&FileStats> for FileSummary {
    fn from(stats: &FileStats) -> Self {
        Self {
            lines: stats.lines.load(Ordering::Relaxed),
            malformed: stats.malformed.load(Ordering::Relaxed),
            not_uplink: stats.not_uplink.load(Ordering::Relaxed),
            unattributed: stats.unattributed.load(Ordering::Relaxed),
            local_as: stats.local_as.load(Ordering::Relaxed),
            half_flows: stats.half_flows.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
