use csv::{ReaderBuilder, StringRecord};
use ip_network::Ipv4Network;
use ip_network_table::IpNetworkTable;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Longest-prefix-match index from local IPv4 address space to the
/// label of the monitored subnet it belongs to.
///
/// Built once at startup from the subnet map (`label;CIDR` per line)
/// and read-only afterwards, so it can be shared between worker
/// threads without locking.
pub struct SubnetIndex {
    /// An LPM trie storing the subnet labels.
    trie: IpNetworkTable<Arc<str>>,
}

impl Default for SubnetIndex {
    fn default() -> Self {
        Self {
            trie: IpNetworkTable::new(),
        }
    }
}

impl SubnetIndex {
    /// Loads the subnet map at `path`. Any malformed entry fails the
    /// whole load: running with half a subnet map would silently
    /// misattribute traffic.
    pub fn load(path: &Path) -> Result<Self, SubnetMapError> {
        if !path.exists() {
            error!("Subnet map does not exist at {:?}", path);
            return Err(SubnetMapError::OpenFail(path.display().to_string()));
        }
        debug!("Loading subnet map from {:?}", path);
        let file = std::fs::File::open(path)
            .map_err(|_| SubnetMapError::OpenFail(path.display().to_string()))?;
        let index = Self::from_reader(file)?;
        info!("Loaded {} subnets from {:?}", index.len(), path);
        Ok(index)
    }

    /// Builds the index from `label;CIDR` text. Blank lines and `#`
    /// comments are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SubnetMapError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut index = Self::default();
        let mut record = StringRecord::new();
        loop {
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    if record.iter().all(str::is_empty) {
                        continue;
                    }
                    if record.len() != 2 {
                        error!("Subnet map line {line} has {} fields", record.len());
                        return Err(SubnetMapError::FieldCount {
                            line,
                            fields: record.len(),
                        });
                    }
                    index.insert(line, &record[1], &record[0])?;
                }
                Err(e) => {
                    error!("Error reading subnet map: {:?}", e);
                    return Err(SubnetMapError::Csv(e.to_string()));
                }
            }
        }
        Ok(index)
    }

    /// Builds the index from `(CIDR, label)` pairs. Errors report the
    /// 1-based position of the offending pair.
    pub fn from_entries<I, C, L>(entries: I) -> Result<Self, SubnetMapError>
    where
        I: IntoIterator<Item = (C, L)>,
        C: AsRef<str>,
        L: AsRef<str>,
    {
        let mut index = Self::default();
        for (i, (cidr, label)) in entries.into_iter().enumerate() {
            index.insert(i as u64 + 1, cidr.as_ref(), label.as_ref())?;
        }
        Ok(index)
    }

    fn insert(&mut self, line: u64, cidr: &str, label: &str) -> Result<(), SubnetMapError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(SubnetMapError::EmptyLabel { line });
        }
        let network = parse_cidr_v4(cidr).map_err(|_| SubnetMapError::InvalidCidr {
            line,
            cidr: cidr.to_string(),
        })?;
        if let Some(previous) = self.trie.insert(network, Arc::from(label)) {
            debug!("Subnet {network} relabelled from {previous} to {label}");
        }
        Ok(())
    }

    /// Returns the label of the most specific configured subnet that
    /// contains `addr`, if any.
    pub fn find(&self, addr: u32) -> Option<&Arc<str>> {
        self.trie
            .longest_match(IpAddr::V4(Ipv4Addr::from(addr)))
            .map(|(_, label)| label)
    }

    /// Number of distinct subnets in the index.
    pub fn len(&self) -> usize {
        self.trie.len().0
    }

    /// Does the index contain no subnets at all?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses `a.b.c.d/len` (or a bare address, meaning `/32`) into a
/// network. Host bits beyond the prefix are dropped.
pub fn parse_cidr_v4(cidr: &str) -> Result<Ipv4Network, SubnetMapError> {
    let cidr = cidr.trim();
    let invalid = || SubnetMapError::InvalidCidr {
        line: 0,
        cidr: cidr.to_string(),
    };
    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (addr, prefix.trim().parse::<u8>().map_err(|_| invalid())?),
        None => (cidr, 32),
    };
    let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
    Ipv4Network::new_truncate(addr, prefix).map_err(|_| invalid())
}

/// Errors raised while building the [`SubnetIndex`].
#[derive(Debug, Error)]
pub enum SubnetMapError {
    #[error("Unable to open/read subnet map {0}")]
    OpenFail(String),
    #[error("Subnet map line {line}: expected `label;CIDR`, found {fields} field(s)")]
    FieldCount { line: u64, fields: usize },
    #[error("Subnet map line {line}: empty label")]
    EmptyLabel { line: u64 },
    #[error("Subnet map line {line}: invalid CIDR `{cidr}`")]
    InvalidCidr { line: u64, cidr: String },
    #[error("Unable to read subnet map: {0}")]
    Csv(String),
}
