use crate::HalfFlow;
use nfsess_config::SubnetIndex;
use nfsess_utils::ipv4::parse_addr;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Positions of the fields we consume in nfdump's pipe-delimited
/// output (`nfdump -o pipe`). IPv4 addresses live in the last of the
/// four address words.
pub mod fields {
    pub const LAST: usize = 3;
    pub const PROTO: usize = 5;
    pub const SRC_IP: usize = 9;
    pub const SRC_PORT: usize = 10;
    pub const DST_IP: usize = 14;
    pub const DST_PORT: usize = 15;
    pub const SRC_AS: usize = 16;
    pub const DST_AS: usize = 17;
    pub const IN_IF: usize = 18;
    pub const OUT_IF: usize = 19;
    pub const BYTES: usize = 23;
}

/// Records with fewer fields than this are rejected outright.
pub const MIN_FIELDS: usize = fields::BYTES + 1;

/// Outcome of classifying one record.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    /// An attributable half-flow.
    Keep(HalfFlow),
    /// Neither interface is an uplink.
    NotUplink,
    /// The local endpoint is outside every monitored subnet.
    Unattributed,
    /// The peer is in our own AS.
    LocalAs,
}

/// A record that could not be parsed. The line is skipped; the rest of
/// the file is unaffected.
#[derive(Debug, Error, PartialEq)]
pub enum FlowParseError {
    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },
    #[error("field {index} ({name}) is not a valid number: `{value}`")]
    BadNumber {
        index: usize,
        name: &'static str,
        value: String,
    },
    #[error("line is not valid UTF-8")]
    NotUtf8,
}

/// Decides which endpoint of a record is local, and whether the record
/// is worth keeping.
pub struct Classifier {
    subnets: Arc<SubnetIndex>,
    uplinks: HashSet<u32>,
    local_asn: u32,
}

impl Classifier {
    pub fn new(subnets: Arc<SubnetIndex>, uplinks: HashSet<u32>, local_asn: u32) -> Self {
        Self {
            subnets,
            uplinks,
            local_asn,
        }
    }

    /// Classifies one raw record (without its line terminator).
    ///
    /// Traffic arriving on an uplink is inbound: the destination is
    /// local. Otherwise, if it leaves through an uplink, the source is
    /// local.
    pub fn classify(&self, line: &str) -> Result<Verdict, FlowParseError> {
        let f: Vec<&str> = line.split('|').collect();
        if f.len() < MIN_FIELDS {
            return Err(FlowParseError::TooFewFields {
                expected: MIN_FIELDS,
                found: f.len(),
            });
        }

        // Records that never touched an uplink are dropped before any
        // field is validated, junk interface fields included.
        let (inbound, uplink) = match (self.uplink(&f, fields::IN_IF), self.uplink(&f, fields::OUT_IF)) {
            (Some(id), _) => (true, id),
            (None, Some(id)) => (false, id),
            (None, None) => return Ok(Verdict::NotUplink),
        };
        number::<u32>(&f, fields::IN_IF, "input interface")?;
        number::<u32>(&f, fields::OUT_IF, "output interface")?;

        let last: u64 = number(&f, fields::LAST, "last")?;
        let proto: u8 = number(&f, fields::PROTO, "protocol")?;
        let src_ip = address(&f, fields::SRC_IP, "source address")?;
        let src_port: u16 = number(&f, fields::SRC_PORT, "source port")?;
        let dst_ip = address(&f, fields::DST_IP, "destination address")?;
        let dst_port: u16 = number(&f, fields::DST_PORT, "destination port")?;
        let src_as: u32 = number(&f, fields::SRC_AS, "source AS")?;
        let dst_as: u32 = number(&f, fields::DST_AS, "destination AS")?;
        let bytes: u64 = number(&f, fields::BYTES, "bytes")?;

        let (local_ip, local_port, remote_ip, remote_port, peer_asn) = if inbound {
            (dst_ip, dst_port, src_ip, src_port, src_as)
        } else {
            (src_ip, src_port, dst_ip, dst_port, dst_as)
        };

        let Some(subnet) = self.subnets.find(local_ip) else {
            return Ok(Verdict::Unattributed);
        };
        if peer_asn == self.local_asn {
            return Ok(Verdict::LocalAs);
        }

        let (bytes_in, bytes_out, in_marker, out_marker) = if inbound {
            (bytes, 0, uplink, 0)
        } else {
            (0, bytes, 0, uplink)
        };

        Ok(Verdict::Keep(HalfFlow {
            last,
            subnet: subnet.clone(),
            proto,
            peer_asn,
            local_ip,
            local_port,
            remote_ip,
            remote_port,
            bytes_in,
            bytes_out,
            in_marker,
            out_marker,
        }))
    }

    fn uplink(&self, f: &[&str], index: usize) -> Option<u32> {
        f[index].trim().parse::<u32>().ok().filter(|id| self.uplinks.contains(id))
    }
}

fn number<T: FromStr>(f: &[&str], index: usize, name: &'static str) -> Result<T, FlowParseError> {
    f[index].trim().parse::<T>().map_err(|_| FlowParseError::BadNumber {
        index,
        name,
        value: f[index].to_string(),
    })
}

fn address(f: &[&str], index: usize, name: &'static str) -> Result<u32, FlowParseError> {
    parse_addr(f[index]).map_err(|_| FlowParseError::BadNumber {
        index,
        name,
        value: f[index].to_string(),
    })
}
