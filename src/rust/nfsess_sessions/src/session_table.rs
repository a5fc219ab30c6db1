use crate::{HalfFlow, SessionKey};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent map from session identity to the merged half-flows seen
/// for it so far. One table lives for the duration of one input file.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<SessionKey, HalfFlow>,
    attribution_conflicts: AtomicU64,
    saturated_merges: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a half-flow, merging it into any existing session with the
    /// same key. The shard lock is held across the merge, so concurrent
    /// callers never lose a contribution.
    pub fn insert_or_merge(&self, flow: HalfFlow) {
        match self.sessions.entry(flow.session_key()) {
            Entry::Occupied(mut entry) => {
                let outcome = entry.get_mut().merge(flow);
                if outcome.conflict {
                    self.attribution_conflicts.fetch_add(1, Ordering::Relaxed);
                }
                if outcome.saturated {
                    self.saturated_merges.fetch_add(1, Ordering::Relaxed);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(flow);
            }
        }
    }

    /// Number of distinct sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// How many merges saw a different subnet label or peer AS for the
    /// same session.
    pub fn attribution_conflicts(&self) -> u64 {
        self.attribution_conflicts.load(Ordering::Relaxed)
    }

    /// How many merges clamped a byte counter at `u64::MAX`.
    pub fn saturated_merges(&self) -> u64 {
        self.saturated_merges.load(Ordering::Relaxed)
    }

    /// Consumes the table, keeping only sessions observed in both
    /// directions. Returns them along with the number dropped.
    pub fn into_complete(self) -> (Vec<HalfFlow>, usize) {
        let total = self.sessions.len();
        let complete: Vec<HalfFlow> = self
            .sessions
            .into_iter()
            .map(|(_, flow)| flow)
            .filter(HalfFlow::is_complete)
            .collect();
        let incomplete = total - complete.len();
        (complete, incomplete)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn half(local_port: u16, bytes_in: u64, bytes_out: u64) -> HalfFlow {
        HalfFlow {
            last: 1,
            subnet: Arc::from("LAN"),
            proto: 6,
            peer_asn: 15169,
            local_ip: 0x0A00_0005,
            local_port,
            remote_ip: 0x0808_0808,
            remote_port: 443,
            bytes_in,
            bytes_out,
            in_marker: if bytes_in > 0 { 100 } else { 0 },
            out_marker: if bytes_out > 0 { 101 } else { 0 },
        }
    }

    #[test]
    fn one_sided_session_is_dropped() {
        let table = SessionTable::new();
        table.insert_or_merge(half(1000, 500, 0));
        let (complete, incomplete) = table.into_complete();
        assert!(complete.is_empty());
        assert_eq!(incomplete, 1);
    }

    #[test]
    fn matching_halves_complete_a_session() {
        let table = SessionTable::new();
        table.insert_or_merge(half(1000, 500, 0));
        table.insert_or_merge(half(1000, 0, 300));
        table.insert_or_merge(half(2000, 0, 50));
        assert_eq!(table.len(), 2);
        let (complete, incomplete) = table.into_complete();
        assert_eq!(incomplete, 1);
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].bytes_in, complete[0].bytes_out), (500, 300));
    }

    #[test]
    fn concurrent_merges_keep_exact_totals() {
        let table = SessionTable::new();
        std::thread::scope(|s| {
            for t in 0..8u64 {
                let table = &table;
                s.spawn(move || {
                    for i in 0..1000u64 {
                        let port = (i % 10) as u16;
                        if (i + t) % 2 == 0 {
                            table.insert_or_merge(half(port, 3, 0));
                        } else {
                            table.insert_or_merge(half(port, 0, 5));
                        }
                    }
                });
            }
        });
        assert_eq!(table.len(), 10);
        assert_eq!(table.attribution_conflicts(), 0);
        let (complete, incomplete) = table.into_complete();
        assert_eq!(incomplete, 0);
        let total_in: u64 = complete.iter().map(|f| f.bytes_in).sum();
        let total_out: u64 = complete.iter().map(|f| f.bytes_out).sum();
        assert_eq!(total_in, 4000 * 3);
        assert_eq!(total_out, 4000 * 5);
    }

    #[test]
    fn conflicting_attribution_is_counted() {
        let table = SessionTable::new();
        table.insert_or_merge(half(1, 5, 0));
        let mut other = half(1, 0, 5);
        other.peer_asn = 1;
        table.insert_or_merge(other);
        assert_eq!(table.attribution_conflicts(), 1);
    }

    #[test]
    fn overflowing_session_is_clamped_and_counted() {
        let table = SessionTable::new();
        table.insert_or_merge(half(7, u64::MAX, 0));
        table.insert_or_merge(half(7, 5, 0));
        table.insert_or_merge(half(7, 0, 1));
        assert_eq!(table.saturated_merges(), 1);
        let (complete, _) = table.into_complete();
        assert_eq!((complete[0].bytes_in, complete[0].bytes_out), (u64::MAX, 1));
    }
}
