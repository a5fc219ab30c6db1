//! Turns nfdump half-flow exports into per-session traffic summaries.
//!
//! Each input line describes one direction of a conversation crossing
//! an uplink. Lines are classified into [`HalfFlow`]s in parallel,
//! merged by [`SessionKey`] in a concurrent [`SessionTable`], and only
//! sessions seen in both directions are written to the report.

mod classifier;
mod half_flow;
mod processor;
mod report;
mod session_table;
mod stats;

pub use classifier::{fields, Classifier, FlowParseError, Verdict, MIN_FIELDS};
pub use half_flow::{HalfFlow, MergeOutcome, SessionKey};
pub use processor::{SessionError, SessionProcessor};
pub use report::{write_report, REPORT_HEADER};
pub use session_table::SessionTable;
pub use stats::{FileStats, FileSummary};
