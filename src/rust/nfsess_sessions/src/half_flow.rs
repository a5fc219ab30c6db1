use std::sync::Arc;

/// Identity of a conversation. Direction is deliberately absent, so
/// the inbound and outbound halves of a session share a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub local_ip: u32,
    pub local_port: u16,
    pub remote_ip: u32,
    pub remote_port: u16,
    pub proto: u8,
}

/// One direction of a conversation as seen at an uplink, or the
/// running aggregate of several such halves once merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HalfFlow {
    /// Flow end time, as exported.
    pub last: u64,
    /// Label of the monitored subnet holding the local endpoint.
    pub subnet: Arc<str>,
    /// IP protocol number.
    pub proto: u8,
    /// AS of the remote endpoint.
    pub peer_asn: u32,
    pub local_ip: u32,
    pub local_port: u16,
    pub remote_ip: u32,
    pub remote_port: u16,
    /// Bytes received from upstream.
    pub bytes_in: u64,
    /// Bytes sent upstream.
    pub bytes_out: u64,
    /// Uplink interface the inbound half arrived on, 0 if not seen.
    pub in_marker: u32,
    /// Uplink interface the outbound half left through, 0 if not seen.
    pub out_marker: u32,
}

/// What a merge noticed besides the sums themselves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Subnet label or peer AS differed from what was already held.
    pub conflict: bool,
    /// A byte counter would have passed `u64::MAX` and was clamped.
    pub saturated: bool,
}

impl HalfFlow {
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            local_ip: self.local_ip,
            local_port: self.local_port,
            remote_ip: self.remote_ip,
            remote_port: self.remote_port,
            proto: self.proto,
        }
    }

    /// Folds `other` (same session key) into `self`.
    ///
    /// Byte counters are summed, saturating at `u64::MAX`. Markers keep
    /// the latest non-zero value and `last` keeps the latest end time,
    /// so the result does not depend on the order halves are merged in.
    /// Subnet label and peer AS are taken from `other`.
    pub fn merge(&mut self, other: HalfFlow) -> MergeOutcome {
        let conflict = self.subnet != other.subnet || self.peer_asn != other.peer_asn;
        let bytes_in = self.bytes_in.checked_add(other.bytes_in);
        let bytes_out = self.bytes_out.checked_add(other.bytes_out);
        let saturated = bytes_in.is_none() || bytes_out.is_none();
        self.bytes_in = bytes_in.unwrap_or(u64::MAX);
        self.bytes_out = bytes_out.unwrap_or(u64::MAX);
        if other.in_marker != 0 {
            self.in_marker = other.in_marker;
        }
        if other.out_marker != 0 {
            self.out_marker = other.out_marker;
        }
        self.last = self.last.max(other.last);
        self.subnet = other.subnet;
        self.peer_asn = other.peer_asn;
        MergeOutcome { conflict, saturated }
    }

    /// Has the session been seen crossing the uplink both ways?
    pub fn is_complete(&self) -> bool {
        self.in_marker != 0 && self.out_marker != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn half(bytes_in: u64, bytes_out: u64, in_marker: u32, out_marker: u32, last: u64) -> HalfFlow {
        HalfFlow {
            last,
            subnet: Arc::from("LAN"),
            proto: 6,
            peer_asn: 15169,
            local_ip: 0x0A00_0005,
            local_port: 50000,
            remote_ip: 0x0808_0808,
            remote_port: 443,
            bytes_in,
            bytes_out,
            in_marker,
            out_marker,
        }
    }

    fn merge_all(order: &[usize], halves: &[HalfFlow]) -> HalfFlow {
        let mut acc = halves[order[0]].clone();
        for i in &order[1..] {
            acc.merge(halves[*i].clone());
        }
        acc
    }

    #[test]
    fn merge_sums_and_marks_both_directions() {
        let mut a = half(500, 0, 100, 0, 10);
        assert!(!a.is_complete());
        let outcome = a.merge(half(0, 300, 0, 101, 12));
        assert_eq!(outcome, MergeOutcome::default());
        assert_eq!((a.bytes_in, a.bytes_out), (500, 300));
        assert_eq!((a.in_marker, a.out_marker), (100, 101));
        assert_eq!(a.last, 12);
        assert!(a.is_complete());
    }

    #[test]
    fn zero_marker_never_clears() {
        let mut a = half(0, 300, 0, 101, 10);
        a.merge(half(0, 5, 0, 0, 9));
        assert_eq!(a.out_marker, 101);
        assert_eq!(a.last, 10);
    }

    #[test]
    fn merge_order_does_not_change_result() {
        let halves = vec![
            half(500, 0, 100, 0, 3),
            half(0, 300, 0, 101, 7),
            half(20, 0, 100, 0, 1),
            half(0, 7, 0, 101, 5),
        ];
        let reference = merge_all(&[0, 1, 2, 3], &halves);
        let orders = [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1], [0, 2, 1, 3]];
        for order in orders {
            let merged = merge_all(&order, &halves);
            assert_eq!(merged.bytes_in, 520);
            assert_eq!(merged.bytes_out, 307);
            assert_eq!(merged.in_marker, reference.in_marker);
            assert_eq!(merged.out_marker, reference.out_marker);
            assert_eq!(merged.last, 7);
        }
    }

    #[test]
    fn grouping_is_associative() {
        let halves = [half(1, 0, 100, 0, 1), half(0, 2, 0, 101, 2), half(4, 0, 100, 0, 3)];
        let mut left = halves[0].clone();
        left.merge(halves[1].clone());
        left.merge(halves[2].clone());

        let mut right_tail = halves[1].clone();
        right_tail.merge(halves[2].clone());
        let mut right = halves[0].clone();
        right.merge(right_tail);

        assert_eq!(left, right);
    }

    #[test]
    fn disagreement_is_reported() {
        let mut a = half(1, 0, 100, 0, 1);
        let mut b = half(0, 1, 0, 101, 1);
        b.subnet = Arc::from("DMZ");
        assert!(a.merge(b).conflict);
        assert_eq!(a.subnet.as_ref(), "DMZ");
    }

    #[test]
    fn byte_sums_saturate_instead_of_wrapping() {
        let mut a = half(u64::MAX, 0, 100, 0, 1);
        let outcome = a.merge(half(5, 0, 100, 0, 1));
        assert!(outcome.saturated);
        assert!(!outcome.conflict);
        assert_eq!(a.bytes_in, u64::MAX);

        let outcome = a.merge(half(0, 1, 0, 101, 2));
        assert!(!outcome.saturated);
        assert_eq!((a.bytes_in, a.bytes_out), (u64::MAX, 1));
        assert!(a.is_complete());
    }

    #[test]
    fn saturated_sums_do_not_depend_on_order() {
        let halves = vec![half(u64::MAX - 1, 0, 100, 0, 1), half(3, 0, 100, 0, 1), half(0, 2, 0, 101, 1)];
        for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
            let merged = merge_all(&order, &halves);
            assert_eq!((merged.bytes_in, merged.bytes_out), (u64::MAX, 2));
        }
    }

    #[test]
    fn key_ignores_direction_and_counters() {
        let a = half(500, 0, 100, 0, 1);
        let b = half(0, 300, 0, 101, 2);
        assert_eq!(a.session_key(), b.session_key());
    }
}
