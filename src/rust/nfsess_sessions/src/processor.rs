use crate::{write_report, Classifier, FileStats, FileSummary, FlowParseError, SessionTable, Verdict};
use rayon::prelude::*;
use std::io::{BufRead, Write};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, trace, warn};

/// Runs the parse, classify, merge, filter and report pipeline over
/// one input file at a time.
pub struct SessionProcessor {
    classifier: Classifier,
    pool: rayon::ThreadPool,
    batch_lines: usize,
}

impl SessionProcessor {
    /// Creates a processor with its own worker pool. `worker_threads`
    /// of 0 sizes the pool to the number of CPUs.
    pub fn new(classifier: Classifier, worker_threads: usize, batch_lines: usize) -> Result<Self, SessionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("nfsess-worker-{i}"))
            .build()
            .map_err(|e| SessionError::WorkerPool(e.to_string()))?;
        Ok(Self {
            classifier,
            pool,
            batch_lines: batch_lines.max(1),
        })
    }

    /// Number of threads in the worker pool.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Reads `input` to the end, merging every attributable half-flow
    /// into a fresh [`SessionTable`].
    ///
    /// Lines are read sequentially in batches and each batch is
    /// classified across the worker pool. Malformed lines are logged
    /// and skipped; a read error aborts the file.
    pub fn aggregate<R: BufRead>(&self, source: &str, mut input: R) -> Result<(SessionTable, FileStats), SessionError> {
        let table = SessionTable::new();
        let stats = FileStats::default();
        let mut first_line = 1;
        loop {
            let batch = read_batch(&mut input, self.batch_lines).map_err(|e| {
                warn!("{source}: read failed after line {}: {e}", first_line - 1);
                SessionError::Read(e.to_string())
            })?;
            if batch.is_empty() {
                break;
            }
            self.pool.install(|| {
                batch.par_iter().enumerate().for_each(|(offset, raw)| {
                    self.handle_line(source, first_line + offset, raw, &table, &stats);
                });
            });
            first_line += batch.len();
        }
        Ok((table, stats))
    }

    fn handle_line(&self, source: &str, line_no: usize, raw: &[u8], table: &SessionTable, stats: &FileStats) {
        use std::sync::atomic::Ordering;
        stats.lines.fetch_add(1, Ordering::Relaxed);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches(['\n', '\r']),
            Err(_) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("{source}:{line_no}: skipping record: {}", FlowParseError::NotUtf8);
                return;
            }
        };
        if line.is_empty() {
            return;
        }
        match self.classifier.classify(line) {
            Ok(verdict) => {
                stats.record(&verdict);
                match verdict {
                    Verdict::Keep(flow) => table.insert_or_merge(flow),
                    other => trace!("{source}:{line_no}: {other:?}"),
                }
            }
            Err(e) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("{source}:{line_no}: skipping record ({e}): {line}");
            }
        }
    }

    /// Processes one whole input file, writing its report to `output`.
    ///
    /// On error nothing written to `output` should be delivered.
    pub fn process<R: BufRead, W: Write>(&self, source: &str, input: R, output: W) -> Result<FileSummary, SessionError> {
        let start = Instant::now();
        info!("Processing {source}");
        let (table, stats) = self.aggregate(source, input)?;

        let mut summary = FileSummary::from(&stats);
        summary.sessions = table.len() as u64;
        summary.attribution_conflicts = table.attribution_conflicts();
        summary.saturated_merges = table.saturated_merges();
        let (complete, incomplete) = table.into_complete();
        summary.incomplete = incomplete as u64;
        summary.rows = write_report(&complete, output)?;
        summary.elapsed_ms = start.elapsed().as_millis() as u64;

        if summary.attribution_conflicts > 0 {
            warn!(
                "{source}: {} merges disagreed on subnet or peer AS, latest value kept",
                summary.attribution_conflicts
            );
        }
        if summary.saturated_merges > 0 {
            warn!(
                "{source}: {} merges overflowed a byte counter, totals clamped at {}",
                summary.saturated_merges,
                u64::MAX
            );
        }
        info!(
            "{source}: {} lines ({} malformed), {} half-flows, {} sessions, {} rows written in {} ms",
            summary.lines, summary.malformed, summary.half_flows, summary.sessions, summary.rows, summary.elapsed_ms
        );
        Ok(summary)
    }
}

fn read_batch<R: BufRead>(input: &mut R, max: usize) -> std::io::Result<Vec<Vec<u8>>> {
    let mut batch = Vec::with_capacity(max.min(4096));
    while batch.len() < max {
        let mut buf = Vec::new();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        batch.push(buf);
    }
    Ok(batch)
}

/// Errors that abort processing of a whole file.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unable to read input: {0}")]
    Read(String),
    #[error("Unable to write report row: {0}")]
    Write(String),
    #[error("Unable to flush report: {0}")]
    Flush(String),
    #[error("Unable to start worker pool: {0}")]
    WorkerPool(String),
}
