mod spool;

use anyhow::{Context, Result};
use nfsess_config::{Config, SubnetIndex};
use nfsess_sessions::{Classifier, SessionProcessor};
use nfsess_utils::spool_watcher::SpoolWatcher;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};

// Use JemAllocator only on supported platforms
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use jemallocator::Jemalloc;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Configure console logging, with the level taken from `RUST_LOG`.
pub fn set_console_logging() -> anyhow::Result<()> {
  let level = if let Ok(level) = std::env::var("RUST_LOG") {
    match level.to_lowercase().as_str() {
      "trace" => LevelFilter::TRACE,
      "debug" => LevelFilter::DEBUG,
      "info" => LevelFilter::INFO,
      "warn" => LevelFilter::WARN,
      "error" => LevelFilter::ERROR,
      _ => LevelFilter::INFO,
    }
  } else {
    LevelFilter::INFO
  };

  let subscriber = tracing_subscriber::fmt()
    .with_max_level(level)
    .compact()
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(false)
    .with_target(false)
    .finish();

  tracing::subscriber::set_global_default(subscriber)?;
  Ok(())
}

fn main() -> Result<()> {
  set_console_logging()?;
  info!("nfsessd starting");

  // A partial subnet map must never be used, so both loads are fatal.
  let config = Config::load().context("Unable to load configuration")?;
  let subnets = SubnetIndex::load(&config.subnet_map)
    .with_context(|| format!("Unable to build subnet index from {:?}", config.subnet_map))?;
  if subnets.is_empty() {
    warn!("Subnet map {:?} is empty: no sessions will be reported", config.subnet_map);
  }

  for dir in [
    &config.spool_directory,
    &config.output_directory,
    &config.failed_directory(),
  ] {
    std::fs::create_dir_all(dir).with_context(|| format!("Unable to create {:?}", dir))?;
  }

  let classifier = Classifier::new(Arc::new(subnets), config.uplink_set(), config.local_asn);
  let processor = SessionProcessor::new(classifier, config.worker_threads, config.batch_lines)?;
  info!(
    "Watching {:?} with {} workers, uplinks {:?}, local AS {}",
    config.spool_directory,
    processor.workers(),
    config.uplinks,
    config.local_asn
  );

  // Finish the file in hand, then stop.
  let shutdown = Arc::new(AtomicBool::new(false));
  signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
  signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

  let watcher = SpoolWatcher::new(
    "spool",
    config.spool_directory.clone(),
    Duration::from_millis(config.poll_interval_ms),
  );
  spool::run(&processor, &watcher, &config, &shutdown);

  info!("nfsessd stopped");
  Ok(())
}
