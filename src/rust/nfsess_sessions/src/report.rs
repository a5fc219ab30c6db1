use crate::{HalfFlow, SessionError};
use csv::{Terminator, WriterBuilder};
use nfsess_utils::ipv4::ntoa;
use serde::Serialize;
use std::io::Write;
use tracing::error;

/// Column names, written once at the top of every report.
pub const REPORT_HEADER: [&str; 12] = [
    "subnet",
    "last",
    "proto",
    "asn",
    "local_ip",
    "local_port",
    "remote_ip",
    "remote_port",
    "ul",
    "dl",
    "bytes_in",
    "bytes_out",
];

// Field order must match REPORT_HEADER.
#[derive(Serialize)]
struct SessionRow<'a> {
    subnet: &'a str,
    last: u64,
    proto: u8,
    asn: u32,
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    ul: u32,
    dl: u32,
    bytes_in: u64,
    bytes_out: u64,
}

impl<'a> From<&'a HalfFlow> for SessionRow<'a> {
    fn from(f: &'a HalfFlow) -> Self {
        Self {
            subnet: &f.subnet,
            last: f.last,
            proto: f.proto,
            asn: f.peer_asn,
            local_ip: ntoa(f.local_ip),
            local_port: f.local_port,
            remote_ip: ntoa(f.remote_ip),
            remote_port: f.remote_port,
            ul: f.in_marker,
            dl: f.out_marker,
            bytes_in: f.bytes_in,
            bytes_out: f.bytes_out,
        }
    }
}

/// Writes the header and one CSV row per session to `sink`, then
/// flushes it. Returns the number of data rows.
///
/// The first failed write aborts the report: the caller must discard
/// the output rather than deliver a truncated file.
pub fn write_report<'a, I, W>(sessions: I, sink: W) -> Result<u64, SessionError>
where
    I: IntoIterator<Item = &'a HalfFlow>,
    W: Write,
{
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(sink);

    writer.write_record(REPORT_HEADER).map_err(|e| {
        error!("Unable to write report header: {e}");
        SessionError::Write(e.to_string())
    })?;

    let mut rows = 0;
    for session in sessions {
        if let Err(e) = writer.serialize(SessionRow::from(session)) {
            error!(
                "Unable to write session {}:{} <-> {}:{} proto {}: {e}",
                ntoa(session.local_ip),
                session.local_port,
                ntoa(session.remote_ip),
                session.remote_port,
                session.proto
            );
            return Err(SessionError::Write(e.to_string()));
        }
        rows += 1;
    }

    writer.flush().map_err(|e| {
        error!("Unable to flush report after {rows} rows: {e}");
        SessionError::Flush(e.to_string())
    })?;
    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;
    use std::sync::Arc;

    fn session() -> HalfFlow {
        HalfFlow {
            last: 1700000060,
            subnet: Arc::from("LAN"),
            proto: 6,
            peer_asn: 15169,
            local_ip: 0x0A00_0005,
            local_port: 50000,
            remote_ip: 3_232_235_521,
            remote_port: 443,
            bytes_in: 500,
            bytes_out: 300,
            in_marker: 100,
            out_marker: 101,
        }
    }

    #[test]
    fn header_only_when_empty() {
        let mut out = Vec::new();
        let rows = write_report(&Vec::new(), &mut out).expect("write failed");
        assert_eq!(rows, 0);
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "subnet,last,proto,asn,local_ip,local_port,remote_ip,remote_port,ul,dl,bytes_in,bytes_out\n"
        );
    }

    #[test]
    fn row_layout() {
        let mut out = Vec::new();
        let rows = write_report(&vec![session()], &mut out).expect("write failed");
        assert_eq!(rows, 1);
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "LAN,1700000060,6,15169,10.0.0.5,50000,192.168.0.1,443,100,101,500,300"
        );
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }
    }

    #[test]
    fn sink_failure_is_an_error() {
        let sessions = vec![session(); 10];
        assert!(write_report(&sessions, BrokenSink).is_err());
    }
}
