//! Moves flow exports through the spool: process each arrived file,
//! publish its report atomically, then remove or quarantine the input.

use anyhow::{Context, Result};
use nfsess_config::Config;
use nfsess_sessions::{FileSummary, SessionProcessor};
use nfsess_utils::spool_watcher::SpoolWatcher;
use std::{
  fs::{self, File},
  io::{BufReader, BufWriter},
  path::{Path, PathBuf},
  sync::atomic::{AtomicBool, Ordering},
};
use tracing::{error, info, warn};

/// Processes spool files in name order until `shutdown` is set.
pub fn run(processor: &SessionProcessor, watcher: &SpoolWatcher, config: &Config, shutdown: &AtomicBool) {
  let failed_dir = config.failed_directory();
  while !shutdown.load(Ordering::Relaxed) {
    match watcher.pending() {
      Ok(files) => {
        for input in files {
          if shutdown.load(Ordering::Relaxed) {
            break;
          }
          handle_file(processor, &input, &config.output_directory, &failed_dir);
        }
      }
      Err(e) => error!("Unable to list spool {:?}: {e}", config.spool_directory),
    }
    watcher.wait();
  }
}

fn handle_file(processor: &SessionProcessor, input: &Path, output_dir: &Path, failed_dir: &Path) {
  match deliver(processor, input, output_dir) {
    Ok((report, _summary)) => info!("Delivered {:?}", report),
    Err(e) => {
      error!("Failed to process {:?}: {e:#}", input);
      if let Err(e) = quarantine(input, failed_dir) {
        error!("Unable to quarantine {:?}: {e:#}", input);
      }
    }
  }
}

/// Report file name for an input: its stem with a `.csv` extension.
pub fn report_name(input: &Path) -> Option<String> {
  input
    .file_stem()
    .map(|stem| format!("{}.csv", stem.to_string_lossy()))
}

/// Processes `input` into a hidden temporary file in `output_dir`,
/// syncs it and renames it into place. The input is removed once the
/// report is visible. On failure the temporary file is removed and
/// nothing appears under the report name.
pub fn deliver(processor: &SessionProcessor, input: &Path, output_dir: &Path) -> Result<(PathBuf, FileSummary)> {
  let source = input
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .context("Input has no file name")?;
  let report = output_dir.join(report_name(input).context("Input has no file stem")?);
  let tmp = output_dir.join(format!(".{source}.tmp"));

  let result = write_report(processor, &source, input, &tmp, &report);
  if result.is_err() && tmp.exists() {
    if let Err(e) = fs::remove_file(&tmp) {
      warn!("Unable to remove temporary file {:?}: {e}", tmp);
    }
  }
  let summary = result?;

  if let Err(e) = fs::remove_file(input) {
    warn!("Report delivered but unable to remove input {:?}: {e}", input);
  }
  Ok((report, summary))
}

fn write_report(
  processor: &SessionProcessor,
  source: &str,
  input: &Path,
  tmp: &Path,
  report: &Path,
) -> Result<FileSummary> {
  let reader = BufReader::new(File::open(input).with_context(|| format!("Unable to open {:?}", input))?);
  let mut writer = BufWriter::new(File::create(tmp).with_context(|| format!("Unable to create {:?}", tmp))?);
  let summary = processor.process(source, reader, &mut writer)?;
  writer
    .get_ref()
    .sync_all()
    .with_context(|| format!("Unable to sync {:?}", tmp))?;
  fs::rename(tmp, report).with_context(|| format!("Unable to rename {:?} to {:?}", tmp, report))?;
  Ok(summary)
}

/// Moves an input that could not be processed out of the spool so it
/// is not retried forever.
pub fn quarantine(input: &Path, failed_dir: &Path) -> Result<PathBuf> {
  fs::create_dir_all(failed_dir).with_context(|| format!("Unable to create {:?}", failed_dir))?;
  let name = input.file_name().context("Input has no file name")?;
  let target = failed_dir.join(name);
  move_file(input, &target)?;
  warn!("Moved {:?} to {:?}", input, target);
  Ok(target)
}

// rename(2) cannot cross filesystems, so fall back to copy and remove.
fn move_file(from: &Path, to: &Path) -> Result<()> {
  if let Err(e) = fs::rename(from, to) {
    fs::copy(from, to).with_context(|| format!("Unable to move {:?} to {:?} (rename: {e})", from, to))?;
    fs::remove_file(from).with_context(|| format!("Copied {:?} to {:?} but unable to remove it", from, to))?;
  }
  Ok(())
}
